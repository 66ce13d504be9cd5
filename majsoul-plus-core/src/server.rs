//! Local asset server: one listener for the lifetime of the process.
//!
//! The preferred port is tried first. "Address in use" falls back exactly once
//! to an OS-assigned port; any other bind failure is fatal to startup.

use std::{
    fmt,
    fs::File,
    io::{self, BufReader},
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::Duration,
};

use axum::Router;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
    service::TowerToHyperService,
};
use rustls::{
    crypto,
    pki_types::{CertificateDer, PrivateKeyDer},
    ServerConfig,
};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::{content::RouteTable, paths::AppPaths};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerProtocol {
    Http,
    Https,
}

impl ServerProtocol {
    pub fn from_config(use_http_server: bool) -> Self {
        if use_http_server {
            Self::Http
        } else {
            Self::Https
        }
    }

    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for ServerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerBinding {
    pub protocol: ServerProtocol,
    /// Configured preference.
    pub port: u16,
    /// Actually bound; differs from `port` only after a fallback.
    pub bound_port: u16,
}

impl ServerBinding {
    pub fn fell_back(&self) -> bool {
        self.port != self.bound_port
    }

    pub fn origin(&self) -> String {
        format!("{}://localhost:{}", self.protocol.scheme(), self.bound_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("port {0} is already in use")]
    AddrInUse(u16),
    #[error("failed to bind asset server on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("port {port} was in use and the fallback bind failed: {source}")]
    Fallback {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to load TLS material {path}: {reason}")]
    TlsMaterial { path: String, reason: String },
    #[error("invalid TLS configuration: {0}")]
    TlsConfig(#[from] rustls::Error),
    #[error("asset server is already bound on port {0}")]
    AlreadyBound(u16),
    #[error("failed to hand listener to the async runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl ServerError {
    /// Only a port conflict is recoverable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AddrInUse(_))
    }
}

fn classify_bind_error(port: u16, error: io::Error) -> ServerError {
    if error.kind() == io::ErrorKind::AddrInUse {
        ServerError::AddrInUse(port)
    } else {
        ServerError::Bind {
            port,
            source: error,
        }
    }
}

pub fn bind_listener(port: u16) -> Result<StdTcpListener, ServerError> {
    StdTcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        .map_err(|error| classify_bind_error(port, error))
}

/// Binds `preferred`, or an ephemeral port when `preferred` is taken.
pub fn bind_with_fallback(preferred: u16) -> Result<(StdTcpListener, u16), ServerError> {
    let listener = match bind_listener(preferred) {
        Ok(listener) => listener,
        Err(ServerError::AddrInUse(port)) => {
            log::warn!("[server] port {port} is in use, falling back to an ephemeral port");
            StdTcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
                .map_err(|source| ServerError::Fallback { port, source })?
        }
        Err(error) => return Err(error),
    };

    let bound_port = listener
        .local_addr()
        .map_err(|source| ServerError::Bind {
            port: preferred,
            source,
        })?
        .port();
    Ok((listener, bound_port))
}

#[derive(Debug)]
pub struct TlsMaterial {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl TlsMaterial {
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, ServerError> {
        let material_error = |path: &Path, reason: String| ServerError::TlsMaterial {
            path: path.display().to_string(),
            reason,
        };

        let mut cert_reader = BufReader::new(
            File::open(cert_path).map_err(|error| material_error(cert_path, error.to_string()))?,
        );
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| material_error(cert_path, error.to_string()))?;
        if certs.is_empty() {
            return Err(material_error(
                cert_path,
                "no certificate found".to_string(),
            ));
        }

        let mut key_reader = BufReader::new(
            File::open(key_path).map_err(|error| material_error(key_path, error.to_string()))?,
        );
        let key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|error| material_error(key_path, error.to_string()))?
            .ok_or_else(|| material_error(key_path, "no private key found".to_string()))?;

        Ok(Self { certs, key })
    }

    pub fn server_config(self) -> Result<ServerConfig, ServerError> {
        let mut config =
            ServerConfig::builder_with_provider(Arc::new(crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()?
                .with_no_client_auth()
                .with_single_cert(self.certs, self.key)?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }
}

#[derive(Debug)]
pub struct AssetServerLauncher {
    protocol: ServerProtocol,
    preferred_port: u16,
    cert_path: PathBuf,
    key_path: PathBuf,
    binding: OnceLock<ServerBinding>,
}

impl AssetServerLauncher {
    pub fn new(protocol: ServerProtocol, preferred_port: u16, paths: &AppPaths) -> Self {
        Self {
            protocol,
            preferred_port,
            cert_path: paths.certificate_file(),
            key_path: paths.private_key_file(),
            binding: OnceLock::new(),
        }
    }

    pub fn protocol(&self) -> ServerProtocol {
        self.protocol
    }

    pub fn binding(&self) -> Option<ServerBinding> {
        self.binding.get().copied()
    }

    /// Binds the listener and starts serving `routes`. Resolves once the bind
    /// outcome is known; serving continues on a background task.
    pub async fn launch(&self, routes: RouteTable) -> Result<ServerBinding, ServerError> {
        if let Some(binding) = self.binding() {
            return Err(ServerError::AlreadyBound(binding.bound_port));
        }

        // TLS material is checked before binding so a failure leaves no listener behind.
        let acceptor = match self.protocol {
            ServerProtocol::Http => None,
            ServerProtocol::Https => {
                let material = TlsMaterial::load(&self.cert_path, &self.key_path)?;
                Some(TlsAcceptor::from(Arc::new(material.server_config()?)))
            }
        };

        let (std_listener, bound_port) = bind_with_fallback(self.preferred_port)?;
        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Runtime)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::Runtime)?;

        let binding = ServerBinding {
            protocol: self.protocol,
            port: self.preferred_port,
            bound_port,
        };
        if self.binding.set(binding).is_err() {
            return Err(ServerError::AlreadyBound(bound_port));
        }

        let router = routes.into_router();
        match acceptor {
            None => {
                tokio::spawn(async move {
                    if let Err(error) = axum::serve(listener, router).await {
                        log::error!("[server] http server stopped: {error}");
                    }
                });
            }
            Some(acceptor) => {
                tokio::spawn(serve_tls(listener, acceptor, router));
            }
        }

        log::info!(
            "[server] {} asset server listening on 127.0.0.1:{} (preferred {})",
            binding.protocol,
            binding.bound_port,
            binding.port
        );
        Ok(binding)
    }
}

async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, router: Router) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                log::warn!("[server] https accept failed: {error}");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(router.clone());
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(tls_stream) => tls_stream,
                Err(error) => {
                    log::debug!("[server] tls handshake with {peer} failed: {error}");
                    return;
                }
            };

            let builder = auto::Builder::new(TokioExecutor::new());
            if let Err(error) = builder
                .serve_connection(TokioIo::new(tls_stream), service)
                .await
            {
                log::debug!("[server] https connection with {peer} ended: {error}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;

    use super::*;
    use crate::{
        provision::{ensure_server_certificate, local_certificate_fingerprint},
        trust::CertificateTrustOverride,
    };

    fn free_port() -> u16 {
        StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .and_then(|listener| listener.local_addr())
            .expect("free port")
            .port()
    }

    fn ping_routes() -> RouteTable {
        RouteTable::new(Router::new().route("/ping", get(|| async { "pong" })))
    }

    fn launcher(protocol: ServerProtocol, port: u16, dir: &Path) -> AssetServerLauncher {
        AssetServerLauncher::new(protocol, port, &AppPaths::new(dir))
    }

    #[test]
    fn classify_bind_error_separates_port_conflicts() {
        let in_use = classify_bind_error(8887, io::Error::from(io::ErrorKind::AddrInUse));
        assert!(matches!(in_use, ServerError::AddrInUse(8887)));
        assert!(!in_use.is_fatal());

        let denied = classify_bind_error(80, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, ServerError::Bind { port: 80, .. }));
        assert!(denied.is_fatal());
    }

    #[test]
    fn bind_with_fallback_uses_ephemeral_port_when_preferred_is_taken() {
        let occupant = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("occupant");
        let taken = occupant.local_addr().expect("occupant addr").port();

        let (_listener, bound) = bind_with_fallback(taken).expect("fallback bind");
        assert_ne!(bound, taken);
        assert_ne!(bound, 0);
        assert_eq!(occupant.local_addr().expect("occupant addr").port(), taken);
    }

    #[test]
    fn server_binding_origin_uses_bound_port() {
        let binding = ServerBinding {
            protocol: ServerProtocol::Https,
            port: 8887,
            bound_port: 51234,
        };
        assert!(binding.fell_back());
        assert_eq!(binding.origin(), "https://localhost:51234");
    }

    #[tokio::test]
    async fn launch_binds_preferred_port_and_serves_routes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let port = free_port();
        let launcher = launcher(ServerProtocol::Http, port, dir.path());

        let binding = launcher.launch(ping_routes()).await.expect("launch");
        assert_eq!(binding.bound_port, port);
        assert!(!binding.fell_back());
        assert_eq!(launcher.binding(), Some(binding));

        let body = reqwest::get(format!("http://127.0.0.1:{}/ping", binding.bound_port))
            .await
            .expect("request")
            .text()
            .await
            .expect("body");
        assert_eq!(body, "pong");
    }

    #[tokio::test]
    async fn launch_falls_back_when_preferred_port_is_occupied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let occupant = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("occupant");
        let taken = occupant.local_addr().expect("occupant addr").port();
        let launcher = launcher(ServerProtocol::Http, taken, dir.path());

        let binding = launcher.launch(ping_routes()).await.expect("launch");
        assert_eq!(binding.port, taken);
        assert_ne!(binding.bound_port, taken);
        assert!(binding.fell_back());

        let status = reqwest::get(format!("http://127.0.0.1:{}/ping", binding.bound_port))
            .await
            .expect("request")
            .status();
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn launch_refuses_to_rebind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = launcher(ServerProtocol::Http, free_port(), dir.path());

        let binding = launcher.launch(ping_routes()).await.expect("first launch");
        let second = launcher.launch(ping_routes()).await;
        assert!(matches!(
            second,
            Err(ServerError::AlreadyBound(port)) if port == binding.bound_port
        ));
        assert_eq!(launcher.binding(), Some(binding));
    }

    #[tokio::test]
    async fn launch_https_without_certificate_is_fatal_and_binds_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let port = free_port();
        let launcher = launcher(ServerProtocol::Https, port, dir.path());

        let error = launcher
            .launch(ping_routes())
            .await
            .expect_err("missing certificate must fail");
        assert!(matches!(error, ServerError::TlsMaterial { .. }));
        assert!(error.is_fatal());
        assert_eq!(launcher.binding(), None);
        assert!(bind_listener(port).is_ok(), "no listener may be left behind");
    }

    #[tokio::test]
    async fn launch_https_serves_routes_to_a_client_trusting_the_local_certificate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path());
        assert!(ensure_server_certificate(&paths).expect("certificate"));
        let launcher = launcher(ServerProtocol::Https, free_port(), dir.path());

        let binding = launcher.launch(ping_routes()).await.expect("launch");
        assert_eq!(binding.protocol, ServerProtocol::Https);

        let client = CertificateTrustOverride::default()
            .with_local_certificate(local_certificate_fingerprint(&paths))
            .http_client("majsoul-plus-test")
            .expect("client");
        let url = format!("https://127.0.0.1:{}/ping", binding.bound_port);
        let body = client
            .get(&url)
            .send()
            .await
            .expect("request")
            .text()
            .await
            .expect("body");
        assert_eq!(body, "pong");

        let strict = CertificateTrustOverride::default()
            .http_client("majsoul-plus-test")
            .expect("client");
        assert!(strict.get(&url).send().await.is_err());
    }

    #[test]
    fn tls_material_rejects_files_without_pem_blocks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cert = dir.path().join("cert.crt");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate").expect("write cert");
        std::fs::write(&key, "not a key").expect("write key");

        assert!(matches!(
            TlsMaterial::load(&cert, &key),
            Err(ServerError::TlsMaterial { .. })
        ));
    }
}
