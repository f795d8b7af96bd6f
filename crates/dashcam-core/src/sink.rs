//! The external persistence contract. The core only ever depends on the
//! `Sink` trait; concrete adapters (HTTP, SQL, a test spy) live outside it.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The three record tables a sink accepts (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkTable {
    Vehicles,
    Tracks,
    TrackMotion,
}

impl SinkTable {
    pub fn as_str(self) -> &'static str {
        match self {
            SinkTable::Vehicles => "vehicles",
            SinkTable::Tracks => "tracks",
            SinkTable::TrackMotion => "track_motion",
        }
    }
}

impl std::fmt::Display for SinkTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink rejected record for table {table}: {message}")]
    Rejected { table: SinkTable, message: String },
    #[error("sink transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write-through adapter to the external record store. `spec.md` specifies
/// only this contract; persistence, deduplication, and schema are the
/// external system's responsibility (§9, open question on idempotence).
pub trait Sink: Send + Sync {
    fn write_record<'a>(
        &'a self,
        table: SinkTable,
        record: serde_json::Value,
    ) -> BoxFuture<'a, Result<(), SinkError>>;
}

/// A sink that logs every call and always succeeds. Used when no external
/// sink is configured, and by tests.
#[derive(Debug, Default)]
pub struct NoopSink;

impl Sink for NoopSink {
    fn write_record<'a>(
        &'a self,
        table: SinkTable,
        record: serde_json::Value,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            eprintln!("[sink:noop] {table} <- {record}");
            Ok(())
        })
    }
}

/// A sink that records every call it received, for use in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub records: std::sync::Mutex<Vec<(SinkTable, serde_json::Value)>>,
}

impl Sink for RecordingSink {
    fn write_record<'a>(
        &'a self,
        table: SinkTable,
        record: serde_json::Value,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            self.records.lock().unwrap().push((table, record));
            Ok(())
        })
    }
}
