//! rustls config construction for both TLS legs.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::version::{TLS12, TLS13};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::debug;
use webpki_roots::TLS_SERVER_ROOTS;

use super::authority::{Authority, AuthorityError, LeafCert};

/// Build the client-facing server config for one intercepted host. The
/// chain presents the forged leaf followed by the interception root.
pub fn leaf_server_config(
    authority: &Authority,
    leaf: &LeafCert,
    alpn_protocols: Vec<Vec<u8>>,
) -> Result<Arc<ServerConfig>, AuthorityError> {
    let chain: Vec<CertificateDer<'static>> = vec![
        CertificateDer::from(leaf.cert_der.clone()),
        CertificateDer::from(authority.root_cert_der()?),
    ];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf.key_der.clone()));

    let versions: [&rustls::SupportedProtocolVersion; 2] = [&TLS12, &TLS13];
    let mut config = ServerConfig::builder_with_protocol_versions(&versions)
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| AuthorityError::InvalidCaMaterial(format!("leaf config: {e}")))?;
    config.alpn_protocols = alpn_protocols;
    debug!(host = %leaf.host, alpn = ?config.alpn_protocols, "built leaf server config");
    Ok(Arc::new(config))
}

/// Shared upstream client config: webpki roots, h2 and http/1.1 offered.
pub fn upstream_client_config(alpn_protocols: Vec<Vec<u8>>) -> Arc<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(TLS_SERVER_ROOTS.iter().cloned());

    let versions: [&rustls::SupportedProtocolVersion; 2] = [&TLS12, &TLS13];
    let mut config = ClientConfig::builder_with_protocol_versions(&versions)
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = alpn_protocols;
    Arc::new(config)
}
