//! TLS Interception Authority
//!
//! `authority` owns the interception root and issues per-host leaf
//! certificates; `config` turns issued leaves into rustls server configs and
//! builds the shared upstream client config.

pub mod authority;
pub mod config;

pub use authority::{Authority, AuthorityConfig, AuthorityError, LeafCert};
pub use config::{leaf_server_config, upstream_client_config};
