//! Interception certificate authority.
//!
//! Loads or generates the root certificate once at startup, then forges
//! leaf certificates for intercepted hosts on demand. Leaves are cached per
//! host with a TTL, and concurrent requests for the same host collapse into
//! a single generation.

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use rand::Rng;
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("I/O error on CA material: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid CA material: {0}")]
    InvalidCaMaterial(String),
    #[error("certificate generation failed for {host}: {reason}")]
    Generation { host: String, reason: String },
}

/// Where the root lives and how leaves are issued.
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub organization: String,
    pub common_name: String,
    /// Leaf validity window in days.
    pub leaf_validity_days: i64,
    pub cache_capacity: usize,
    /// Cached leaves older than this are reissued.
    pub cache_ttl: Duration,
    /// When set, issued leaves are persisted here and reloaded across
    /// restarts instead of being regenerated.
    pub leaf_dir: Option<PathBuf>,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("ca/root-cert.pem"),
            key_path: PathBuf::from("ca/root-key.pem"),
            organization: "Periscope Proxy".to_string(),
            common_name: "Periscope Interception CA".to_string(),
            leaf_validity_days: 90,
            cache_capacity: 1024,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            leaf_dir: None,
        }
    }
}

/// A forged certificate for one host. Immutable once issued; reissue on
/// expiry creates a new entry.
#[derive(Serialize, Deserialize)]
pub struct LeafCert {
    pub host: String,
    /// Leaf DER, signed by the root.
    pub cert_der: Vec<u8>,
    /// PKCS#8 private key DER.
    pub key_der: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeafCert {
    fn is_fresh(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.issued_at);
        age.to_std().map(|age| age < ttl).unwrap_or(true)
    }
}

struct CaMaterial {
    cert: Certificate,
    cert_pem: String,
}

/// The process-wide interception authority. Construct once at startup and
/// share by reference into every connection handler.
pub struct Authority {
    config: AuthorityConfig,
    ca: CaMaterial,
    cache: Mutex<LruCache<String, Arc<LeafCert>>>,
    /// Per-host issuance locks, so one generation serves all waiters.
    issue_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Authority {
    /// Load the root from disk, generating and persisting it on first run.
    pub async fn load_or_generate(config: AuthorityConfig) -> Result<Self, AuthorityError> {
        let ca = if fs::try_exists(&config.cert_path).await? && fs::try_exists(&config.key_path).await?
        {
            Self::load_ca(&config).await?
        } else {
            let ca = Self::generate_ca(&config)?;
            Self::save_ca(&config, &ca).await?;
            info!(cert_path = %config.cert_path.display(), "generated new interception root");
            ca
        };

        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).expect("capacity >= 1");
        Ok(Self {
            config,
            ca,
            cache: Mutex::new(LruCache::new(capacity)),
            issue_locks: Mutex::new(HashMap::new()),
        })
    }

    async fn load_ca(config: &AuthorityConfig) -> Result<CaMaterial, AuthorityError> {
        let cert_pem = fs::read_to_string(&config.cert_path).await?;
        let key_pem = fs::read_to_string(&config.key_path).await?;
        let key_pair = KeyPair::from_pem(&key_pem)
            .map_err(|e| AuthorityError::InvalidCaMaterial(format!("root key: {e}")))?;
        let params = CertificateParams::from_ca_cert_pem(&cert_pem, key_pair)
            .map_err(|e| AuthorityError::InvalidCaMaterial(format!("root cert: {e}")))?;
        let cert = Certificate::from_params(params)
            .map_err(|e| AuthorityError::InvalidCaMaterial(format!("root rebuild: {e}")))?;
        info!(cert_path = %config.cert_path.display(), "loaded interception root");
        Ok(CaMaterial { cert, cert_pem })
    }

    fn generate_ca(config: &AuthorityConfig) -> Result<CaMaterial, AuthorityError> {
        let mut params = CertificateParams::default();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, &config.organization);
        dn.push(DnType::CommonName, &config.common_name);
        params.distinguished_name = dn;

        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
        params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(3650);
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
            rcgen::KeyUsagePurpose::DigitalSignature,
        ];

        let key_pair = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256).map_err(|e| {
            AuthorityError::InvalidCaMaterial(format!("root key generation: {e}"))
        })?;
        params.key_pair = Some(key_pair);

        let cert = Certificate::from_params(params)
            .map_err(|e| AuthorityError::InvalidCaMaterial(format!("root generation: {e}")))?;
        let cert_pem = cert
            .serialize_pem()
            .map_err(|e| AuthorityError::InvalidCaMaterial(format!("root serialization: {e}")))?;
        Ok(CaMaterial { cert, cert_pem })
    }

    async fn save_ca(config: &AuthorityConfig, ca: &CaMaterial) -> Result<(), AuthorityError> {
        if let Some(parent) = config.cert_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Some(parent) = config.key_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&config.cert_path, &ca.cert_pem).await?;
        fs::write(&config.key_path, ca.cert.get_key_pair().serialize_pem()).await?;
        Ok(())
    }

    /// Root certificate PEM, for export to clients that must trust it.
    pub fn root_cert_pem(&self) -> &str {
        &self.ca.cert_pem
    }

    /// Root certificate DER, appended to leaf chains. Decoded from the
    /// persisted PEM so the bytes match what clients were told to trust.
    pub fn root_cert_der(&self) -> Result<Vec<u8>, AuthorityError> {
        let mut reader = std::io::Cursor::new(self.ca.cert_pem.as_bytes());
        let cert = rustls_pemfile::certs(&mut reader)
            .next()
            .ok_or_else(|| {
                AuthorityError::InvalidCaMaterial("no certificate in root PEM".to_string())
            })?
            .map_err(|e| AuthorityError::InvalidCaMaterial(format!("root PEM: {e}")))?;
        Ok(cert.to_vec())
    }

    /// Issue a leaf for `host`, reusing a fresh cached entry when present.
    pub async fn issue(&self, host: &str) -> Result<Arc<LeafCert>, AuthorityError> {
        if let Some(leaf) = self.cached(host).await {
            return Ok(leaf);
        }

        let host_lock = {
            let mut locks = self.issue_locks.lock().await;
            locks
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = host_lock.lock().await;
        let result = self.issue_locked(host).await;
        drop(guard);

        // The entry must go away whether generation succeeded or not, or a
        // host that keeps failing pins its lock in the map forever.
        self.issue_locks.lock().await.remove(host);
        result
    }

    /// Runs under the per-host lock: recheck the cache, try the disk store,
    /// then generate and persist.
    async fn issue_locked(&self, host: &str) -> Result<Arc<LeafCert>, AuthorityError> {
        // Another caller may have finished while we waited for the lock.
        if let Some(leaf) = self.cached(host).await {
            return Ok(leaf);
        }

        if let Some(leaf) = self.load_leaf(host).await {
            debug!(host, expires_at = %leaf.expires_at, "reloaded persisted leaf certificate");
            self.cache.lock().await.put(host.to_string(), leaf.clone());
            return Ok(leaf);
        }

        let leaf = Arc::new(self.generate_leaf(host)?);
        debug!(host, expires_at = %leaf.expires_at, "issued leaf certificate");
        self.persist_leaf(&leaf).await;
        self.cache.lock().await.put(host.to_string(), leaf.clone());
        Ok(leaf)
    }

    /// Load a persisted leaf if one exists and is still usable.
    async fn load_leaf(&self, host: &str) -> Option<Arc<LeafCert>> {
        let dir = self.config.leaf_dir.as_ref()?;
        let bytes = fs::read(leaf_path(dir, host)).await.ok()?;
        let leaf: LeafCert = serde_json::from_slice(&bytes).ok()?;
        if leaf.host != host
            || !leaf.is_fresh(self.config.cache_ttl)
            || leaf.expires_at <= Utc::now()
        {
            return None;
        }
        Some(Arc::new(leaf))
    }

    /// Persistence failures only cost a regeneration on restart, so they are
    /// logged rather than propagated.
    async fn persist_leaf(&self, leaf: &LeafCert) {
        let Some(dir) = self.config.leaf_dir.as_ref() else {
            return;
        };
        let result = async {
            fs::create_dir_all(dir).await?;
            let bytes = serde_json::to_vec(leaf)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            fs::write(leaf_path(dir, &leaf.host), bytes).await
        }
        .await;
        if let Err(e) = result {
            warn!(host = %leaf.host, error = %e, "failed to persist leaf certificate");
        }
    }

    async fn cached(&self, host: &str) -> Option<Arc<LeafCert>> {
        let mut cache = self.cache.lock().await;
        match cache.get(host) {
            Some(leaf) if leaf.is_fresh(self.config.cache_ttl) => Some(leaf.clone()),
            Some(_) => {
                cache.pop(host);
                None
            }
            None => None,
        }
    }

    fn generate_leaf(&self, host: &str) -> Result<LeafCert, AuthorityError> {
        if host.is_empty() {
            return Err(AuthorityError::Generation {
                host: String::new(),
                reason: "empty host name".to_string(),
            });
        }

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, &self.config.organization);
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;

        params.subject_alt_names = match host.parse::<IpAddr>() {
            Ok(ip) => vec![SanType::IpAddress(ip)],
            Err(_) => vec![SanType::DnsName(host.to_string())],
        };

        let issued_at = Utc::now();
        let expires_at = issued_at + chrono::Duration::days(self.config.leaf_validity_days);
        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
        params.not_after =
            time::OffsetDateTime::now_utc() + time::Duration::days(self.config.leaf_validity_days);
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::DigitalSignature,
            rcgen::KeyUsagePurpose::KeyEncipherment,
        ];
        params.serial_number = Some(generate_serial().into());

        let key_pair = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256).map_err(|e| {
            AuthorityError::Generation {
                host: host.to_string(),
                reason: format!("key generation: {e}"),
            }
        })?;
        params.key_pair = Some(key_pair);

        let cert = Certificate::from_params(params).map_err(|e| AuthorityError::Generation {
            host: host.to_string(),
            reason: format!("params: {e}"),
        })?;
        let cert_der =
            cert.serialize_der_with_signer(&self.ca.cert)
                .map_err(|e| AuthorityError::Generation {
                    host: host.to_string(),
                    reason: format!("signing: {e}"),
                })?;
        let key_der = cert.serialize_private_key_der();

        Ok(LeafCert {
            host: host.to_string(),
            cert_der,
            key_der,
            issued_at,
            expires_at,
        })
    }

    /// Number of cached leaves, for diagnostics.
    pub async fn cache_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    #[cfg(test)]
    async fn issue_lock_count(&self) -> usize {
        self.issue_locks.lock().await.len()
    }
}

/// Hosts come straight off the wire, so anything outside a conservative
/// character set is replaced before it becomes a file name.
fn leaf_path(dir: &Path, host: &str) -> PathBuf {
    let safe: String = host
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{safe}.json"))
}

/// Timestamp in the high bits, random low bits; unique enough across
/// restarts for forged leaves.
fn generate_serial() -> u64 {
    let timestamp = Utc::now().timestamp() as u64;
    let random: u32 = rand::thread_rng().gen();
    (timestamp << 32) | u64::from(random)
}
