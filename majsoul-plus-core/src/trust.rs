//! Certificate trust override for outbound TLS.
//!
//! Normal WebPKI validation always runs first. Only when it fails do we look
//! at the certificate fingerprint, and only the pinned fingerprint of the local
//! asset server's certificate is allowed through. Nothing else in the crate
//! relaxes certificate checking. The same decision backs the webview hooks in
//! the desktop shell.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        WebPkiServerVerifier,
    },
    crypto::{self, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use sha2::{Digest, Sha256};

/// Fingerprint of the certificate bundled with the local asset server.
pub const TRUSTED_FINGERPRINT: &str = "sha256/UMNIGcBbbIcru/0L2e1idl+aQS7PUHqsZDcrETqdMsc=";

#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("failed to build certificate verifier: {0}")]
    Verifier(String),
    #[error("failed to build TLS client config: {0}")]
    Tls(#[from] rustls::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Same format the browser runtime reports: `sha256/<base64 of the DER digest>`.
pub fn certificate_fingerprint(der: &[u8]) -> String {
    format!("sha256/{}", STANDARD.encode(Sha256::digest(der)))
}

/// First certificate of a PEM document, as DER.
pub fn leaf_certificate_from_pem(pem: &str) -> Option<Vec<u8>> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .next()?
        .ok()
        .map(|der| der.as_ref().to_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    Accept,
    /// Leave the default (rejecting) verdict in place.
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateTrustOverride {
    pinned: String,
    /// Certificate generated into the data directory on first run.
    local: Option<String>,
}

impl Default for CertificateTrustOverride {
    fn default() -> Self {
        Self::with_fingerprint(TRUSTED_FINGERPRINT)
    }
}

impl CertificateTrustOverride {
    pub fn with_fingerprint(fingerprint: impl Into<String>) -> Self {
        Self {
            pinned: fingerprint.into(),
            local: None,
        }
    }

    /// Also trusts the server certificate provisioned for this data directory.
    pub fn with_local_certificate(mut self, fingerprint: Option<String>) -> Self {
        self.local = fingerprint;
        self
    }

    pub fn pinned_fingerprint(&self) -> &str {
        &self.pinned
    }

    pub fn local_fingerprint(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn evaluate(&self, fingerprint: &str) -> TrustDecision {
        if fingerprint == self.pinned || self.local.as_deref() == Some(fingerprint) {
            TrustDecision::Accept
        } else {
            TrustDecision::Default
        }
    }

    pub fn evaluate_certificate(&self, der: &[u8]) -> TrustDecision {
        self.evaluate(&certificate_fingerprint(der))
    }

    /// WebView2 and WebKitGTK hand the failing certificate over as PEM.
    pub fn evaluate_pem(&self, pem: &str) -> TrustDecision {
        match leaf_certificate_from_pem(pem) {
            Some(der) => self.evaluate_certificate(&der),
            None => TrustDecision::Default,
        }
    }

    pub(crate) fn verifier(&self) -> Result<Arc<PinnedCertVerifier>, TrustError> {
        let provider = Arc::new(crypto::ring::default_provider());
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|error| TrustError::Verifier(error.to_string()))?;

        Ok(Arc::new(PinnedCertVerifier {
            inner,
            provider,
            trust: self.clone(),
        }))
    }

    pub fn client_config(&self) -> Result<ClientConfig, TrustError> {
        let verifier = self.verifier()?;
        let config = ClientConfig::builder_with_provider(verifier.provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        Ok(config)
    }

    /// Client for the asset-patch pipeline's outbound fetches.
    pub fn http_client(&self, user_agent: &str) -> Result<reqwest::Client, TrustError> {
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(self.client_config()?)
            .user_agent(user_agent)
            .build()?;
        Ok(client)
    }
}

#[derive(Debug)]
pub(crate) struct PinnedCertVerifier {
    inner: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
    trust: CertificateTrustOverride,
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let error = match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => return Ok(verified),
            Err(error) => error,
        };

        match self.trust.evaluate_certificate(end_entity.as_ref()) {
            TrustDecision::Accept => {
                log::debug!("[trust] accepted pinned certificate for {server_name:?}");
                Ok(ServerCertVerified::assertion())
            }
            TrustDecision::Default => Err(error),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DER: &[u8] = b"majsoul-plus test certificate";
    const SAMPLE_FINGERPRINT: &str = "sha256/uF+UQ7r91e3VkJC9wLNPYweA+QIlpEAKcHP8XgC0J3o=";

    fn verify(
        trust: &CertificateTrustOverride,
        der: &[u8],
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verifier = trust.verifier().expect("verifier should build");
        let server_name = ServerName::try_from("localhost").expect("valid server name");
        verifier.verify_server_cert(
            &CertificateDer::from(der.to_vec()),
            &[],
            &server_name,
            &[],
            UnixTime::now(),
        )
    }

    #[test]
    fn certificate_fingerprint_matches_runtime_format() {
        assert_eq!(certificate_fingerprint(SAMPLE_DER), SAMPLE_FINGERPRINT);
    }

    #[test]
    fn evaluate_accepts_only_the_exact_pinned_fingerprint() {
        let trust = CertificateTrustOverride::default();
        assert_eq!(trust.evaluate(TRUSTED_FINGERPRINT), TrustDecision::Accept);

        let near_miss = TRUSTED_FINGERPRINT.replace("Msc=", "Msd=");
        assert_eq!(trust.evaluate(&near_miss), TrustDecision::Default);
        assert_eq!(trust.evaluate(""), TrustDecision::Default);
        assert_eq!(
            trust.evaluate(&TRUSTED_FINGERPRINT.to_lowercase()),
            TrustDecision::Default
        );
    }

    #[test]
    fn evaluate_accepts_local_certificate_alongside_pin() {
        let trust = CertificateTrustOverride::default()
            .with_local_certificate(Some(SAMPLE_FINGERPRINT.to_string()));

        assert_eq!(trust.evaluate(SAMPLE_FINGERPRINT), TrustDecision::Accept);
        assert_eq!(trust.evaluate(TRUSTED_FINGERPRINT), TrustDecision::Accept);
        let near_miss = SAMPLE_FINGERPRINT.replace("J3o=", "J3p=");
        assert_eq!(trust.evaluate(&near_miss), TrustDecision::Default);
    }

    #[test]
    fn evaluate_pem_fingerprints_the_leaf_certificate() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("generate certificate");
        let pem = generated.cert.pem();
        let fingerprint = certificate_fingerprint(generated.cert.der());

        let trusting =
            CertificateTrustOverride::default().with_local_certificate(Some(fingerprint));
        assert_eq!(trusting.evaluate_pem(&pem), TrustDecision::Accept);
        assert_eq!(
            CertificateTrustOverride::default().evaluate_pem(&pem),
            TrustDecision::Default
        );
        assert_eq!(
            trusting.evaluate_pem("not a certificate"),
            TrustDecision::Default
        );
    }

    #[test]
    fn verifier_accepts_certificate_with_pinned_fingerprint() {
        let trust = CertificateTrustOverride::with_fingerprint(SAMPLE_FINGERPRINT);
        assert!(verify(&trust, SAMPLE_DER).is_ok());
    }

    #[test]
    fn verifier_rejects_single_byte_difference() {
        let trust = CertificateTrustOverride::with_fingerprint(SAMPLE_FINGERPRINT);
        assert!(verify(&trust, b"majsoul-plus test certificatf").is_err());
    }

    #[test]
    fn verifier_rejects_everything_with_default_pin() {
        let trust = CertificateTrustOverride::default();
        assert!(verify(&trust, SAMPLE_DER).is_err());
    }

    #[test]
    fn http_client_builds_with_pinned_tls() {
        let trust = CertificateTrustOverride::default();
        assert!(trust.http_client("MajsoulPlus/test").is_ok());
    }
}
