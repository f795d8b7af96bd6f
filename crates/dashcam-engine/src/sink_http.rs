//! Concrete HTTP `Sink` adapter (§4.10). `dashcam_core::Sink` only specifies
//! the contract; this is the default external-record-store implementation a
//! deployment actually runs with `NoopSink` reserved for tests and
//! no-sink-configured runs.
//!
//! Ported from `client-engine`'s `backend.rs` request idiom: build the URL
//! by joining a path onto a base, POST JSON, check `status().is_success()`,
//! and fold a non-success response's body into the error.

use dashcam_core::{BoxFuture, Sink, SinkError, SinkTable};
use reqwest::Url;

/// Posts each record as JSON to `{base_url}/{table}`, one POST per
/// `write_record` call. Idempotence and deduplication are the receiving
/// service's responsibility (§9, open question); this adapter does not
/// retry on failure, matching `write_record`'s fallible contract.
pub struct HttpSink {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpSink {
    pub fn new(base_url: Url) -> Self {
        HttpSink {
            http: reqwest::Client::new(),
            base_url,
        }
    }
}

impl Sink for HttpSink {
    fn write_record<'a>(
        &'a self,
        table: SinkTable,
        record: serde_json::Value,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            let url = self
                .base_url
                .join(table.as_str())
                .map_err(|err| SinkError::Transport(err.into()))?;

            let res = self
                .http
                .post(url)
                .json(&record)
                .send()
                .await
                .map_err(|err| SinkError::Transport(err.into()))?;

            if !res.status().is_success() {
                let message = res.text().await.unwrap_or_default();
                return Err(SinkError::Rejected { table, message });
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_table_name_onto_base_url() {
        let base = Url::parse("https://sink.example/api/").unwrap();
        let sink = HttpSink::new(base);
        assert_eq!(
            sink.base_url.join(SinkTable::Vehicles.as_str()).unwrap().as_str(),
            "https://sink.example/api/vehicles"
        );
    }
}
