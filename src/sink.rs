//! Exchange Sink
//!
//! The single boundary to the storage collaborator. The engine converts
//! each finalized exchange to a flat record, applies the body-size cap, and
//! hands it to a bounded channel; a background task forwards records to the
//! configured sink so the relay path never blocks on persistence longer
//! than the channel allows.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::exchange::{Exchange, ExchangeOutcome, Header, Scheme, ToolTag};

/// Default cap on stored body bytes per message.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Flat, storage-ready form of one exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub method: String,
    pub path: String,
    pub request_headers: Vec<Header>,
    #[serde(with = "body_b64")]
    pub request_body: Vec<u8>,
    pub status: Option<u16>,
    pub response_headers: Vec<Header>,
    #[serde(with = "body_b64")]
    pub response_body: Vec<u8>,
    pub tool: ToolTag,
    pub in_scope: bool,
    /// Set when either body was cut at the configured cap; oversized bodies
    /// are truncated, never dropped.
    pub truncated: bool,
    pub outcome: ExchangeOutcome,
}

impl ExchangeRecord {
    pub fn from_exchange(exchange: &Exchange, in_scope: bool, max_body_bytes: usize) -> Self {
        let mut truncated = exchange.truncated;
        let request_body = cap_body(&exchange.request.body, max_body_bytes, &mut truncated);
        let response_body = exchange
            .response
            .as_ref()
            .map(|r| cap_body(&r.body, max_body_bytes, &mut truncated))
            .unwrap_or_default();

        Self {
            id: exchange.id,
            sent_at: exchange.started_at,
            completed_at: exchange.completed_at,
            host: exchange.host.clone(),
            port: exchange.port,
            scheme: exchange.scheme,
            method: exchange.request.method.clone(),
            path: exchange.path().to_string(),
            request_headers: exchange.request.headers.0.clone(),
            request_body,
            status: exchange.response.as_ref().map(|r| r.status),
            response_headers: exchange
                .response
                .as_ref()
                .map(|r| r.headers.0.clone())
                .unwrap_or_default(),
            response_body,
            tool: exchange.tool,
            in_scope,
            truncated,
            outcome: exchange.outcome,
        }
    }
}

/// Bodies are arbitrary bytes; serialize them as base64 strings so records
/// stay valid JSON.
mod body_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

fn cap_body(body: &[u8], max: usize, truncated: &mut bool) -> Vec<u8> {
    if body.len() > max {
        *truncated = true;
        body[..max].to_vec()
    } else {
        body.to_vec()
    }
}

/// Storage collaborator interface.
pub trait ExchangeSink: Send + Sync {
    fn record(&self, record: ExchangeRecord);
}

/// In-memory sink, used by tests and as a default.
#[derive(Default)]
pub struct MemorySink {
    records: std::sync::Mutex<Vec<ExchangeRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ExchangeRecord> {
        self.records.lock().expect("sink lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExchangeSink for MemorySink {
    fn record(&self, record: ExchangeRecord) {
        self.records.lock().expect("sink lock poisoned").push(record);
    }
}

/// Append-only JSON Lines sink, one record per line.
pub struct JsonLinesSink {
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl ExchangeSink for JsonLinesSink {
    fn record(&self, record: ExchangeRecord) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(id = %record.id, error = %e, "exchange record not serializable");
                return;
            }
        };
        let mut file = self.file.lock().expect("sink lock poisoned");
        if let Err(e) = writeln!(file, "{line}") {
            warn!(id = %record.id, error = %e, "failed to append exchange record");
        }
    }
}

/// Sending half of the sink channel, cloned into connection handlers.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<ExchangeRecord>,
}

impl SinkHandle {
    /// Push a record, waiting if the sink is backed up.
    pub async fn emit(&self, record: ExchangeRecord) {
        if let Err(e) = self.tx.send(record).await {
            warn!("exchange record dropped, sink task gone: {e}");
        }
    }
}

/// Spawn the forwarding task for `sink` and return the shared handle.
pub fn spawn_sink(sink: Arc<dyn ExchangeSink>, capacity: usize) -> SinkHandle {
    let (tx, mut rx) = mpsc::channel::<ExchangeRecord>(capacity.max(1));
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            debug!(id = %record.id, host = %record.host, "forwarding exchange record");
            sink.record(record);
        }
    });
    SinkHandle { tx }
}
