use axum::{
    http::{header, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use url::Url;

use crate::{
    config::UserConfig,
    content::{assemble_routes, DirectoryContentLoader, RouteTable},
    paths::{http_user_agent, remote_domain, AppPaths},
    trust::CertificateTrustOverride,
};

/// Mirrors requests that no content route claimed from the remote game domain.
#[derive(Debug, Clone)]
pub struct RemoteMirror {
    client: reqwest::Client,
    base: Url,
}

impl RemoteMirror {
    pub fn new(client: reqwest::Client, domain: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            client,
            base: Url::parse(domain)?,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Returns `None` when the request would escape the mirrored origin.
    pub fn upstream_url(&self, path_and_query: &str) -> Option<Url> {
        let relative = path_and_query.trim_start_matches('/');
        let joined = self.base.join(relative).ok()?;
        if joined.origin() != self.base.origin() {
            return None;
        }
        Some(joined)
    }

    pub fn install(self, router: Router) -> Router {
        router.fallback(move |uri: Uri| {
            let mirror = self.clone();
            async move { mirror.forward(uri).await }
        })
    }

    pub async fn forward(&self, uri: Uri) -> Response {
        let path_and_query = uri
            .path_and_query()
            .map(|value| value.as_str())
            .unwrap_or("/");
        let Some(url) = self.upstream_url(path_and_query) else {
            return StatusCode::BAD_REQUEST.into_response();
        };

        let upstream = match self.client.get(url.clone()).send().await {
            Ok(upstream) => upstream,
            Err(error) => {
                log::warn!("[server] mirror request to {url} failed: {error}");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        let status = upstream.status();
        let content_type = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| HeaderValue::from_bytes(value.as_bytes()).ok());
        let body = match upstream.bytes().await {
            Ok(body) => body,
            Err(error) => {
                log::warn!("[server] mirror body from {url} failed: {error}");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        let mut response = (status, body).into_response();
        if let Some(content_type) = content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// Local content routes first, then the remote mirror for everything else.
/// Without a usable outbound client the local routes are served alone.
pub fn asset_routes(paths: &AppPaths, config: &UserConfig, version: &str) -> RouteTable {
    let table = assemble_routes(&DirectoryContentLoader::defaults(paths));
    let domain = remote_domain(config.user_data.server_to_play);

    let client = match CertificateTrustOverride::default().http_client(&http_user_agent(version)) {
        Ok(client) => client,
        Err(error) => {
            log::error!("[trust] outbound client unavailable, mirror disabled: {error}");
            return table;
        }
    };
    match RemoteMirror::new(client, domain.domain) {
        Ok(mirror) => {
            log::info!("[server] mirroring {} ({})", domain.domain, domain.name);
            table.map_router(|router| mirror.install(router))
        }
        Err(error) => {
            log::error!("[server] invalid remote domain {}: {error}", domain.domain);
            table
        }
    }
}
