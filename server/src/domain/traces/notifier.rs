//! Raw message intake for one data source
//!
//! Decodes queue payloads (`{"data": [...]}`) into standard spans and
//! forwards each non-empty batch to the window's span channel. Malformed
//! payloads are dropped with a warning and counted.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::span::{StandardSpan, WireMessage};

pub struct Notifier {
    data_id: String,
    spans_tx: mpsc::Sender<Vec<StandardSpan>>,
}

impl Notifier {
    pub fn new(data_id: &str, spans_tx: mpsc::Sender<Vec<StandardSpan>>) -> Self {
        Self {
            data_id: data_id.to_string(),
            spans_tx,
        }
    }

    /// Decode one payload; `None` when it is malformed or carries no usable span
    pub fn decode(&self, payload: &[u8]) -> Option<Vec<StandardSpan>> {
        let message: WireMessage = match serde_json::from_slice(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    data_id = %self.data_id,
                    error = %e,
                    bytes = payload.len(),
                    "Dropping malformed message"
                );
                self.count_dropped("malformed", 1);
                return None;
            }
        };

        let received = message.data.len();
        let spans: Vec<StandardSpan> = message
            .data
            .into_iter()
            .filter_map(|span| span.into_standard())
            .collect();

        let skipped = received - spans.len();
        if skipped > 0 {
            tracing::debug!(data_id = %self.data_id, skipped, "Dropped spans without trace id");
            self.count_dropped("empty_trace_id", skipped as u64);
        }

        (!spans.is_empty()).then_some(spans)
    }

    fn count_dropped(&self, reason: &'static str, count: u64) {
        metrics::counter!(
            "precalc_notifier_dropped_total",
            "data_id" => self.data_id.clone(),
            "reason" => reason
        )
        .increment(count);
    }

    /// Consume raw payloads until shutdown or until every sender is gone
    pub fn start(
        self: Arc<Self>,
        mut raw_rx: mpsc::Receiver<Vec<u8>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    payload = raw_rx.recv() => {
                        let Some(payload) = payload else { break };
                        let Some(spans) = self.decode(&payload) else { continue };
                        tokio::select! {
                            sent = self.spans_tx.send(spans) => {
                                if sent.is_err() {
                                    tracing::warn!(
                                        data_id = %self.data_id,
                                        "Span channel closed, stopping notifier"
                                    );
                                    break;
                                }
                            }
                            _ = shutdown_rx.wait_for(|&v| v) => break,
                        }
                    }
                }
            }
            tracing::debug!(data_id = %self.data_id, "Notifier stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use serde_json::json;

    use super::*;

    fn payload(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_decode_valid_message() {
        let (tx, _rx) = mpsc::channel(1);
        let notifier = Notifier::new("1001", tx);
        let spans = notifier
            .decode(&payload(json!({
                "data": [
                    { "trace_id": "t1", "span_id": "a", "kind": 2 },
                    { "trace_id": "", "span_id": "b" }
                ]
            })))
            .unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].span_id, "a");
    }

    #[test]
    fn test_decode_empty_batch_is_none() {
        let (tx, _rx) = mpsc::channel(1);
        let notifier = Notifier::new("1001", tx);
        assert!(notifier.decode(&payload(json!({ "data": [] }))).is_none());
        assert!(notifier.decode(&payload(json!({}))).is_none());
    }

    #[test]
    fn test_malformed_message_counted() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let (tx, _rx) = mpsc::channel(1);
            let notifier = Notifier::new("1001", tx);
            assert!(notifier.decode(b"not json").is_none());
        });

        let dropped: u64 = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, _, _, _)| key.key().name() == "precalc_notifier_dropped_total")
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(v) => v,
                _ => 0,
            })
            .sum();
        assert_eq!(dropped, 1);
    }

    #[tokio::test]
    async fn test_forwards_batches_and_skips_bad_payloads() {
        let (spans_tx, mut spans_rx) = mpsc::channel(8);
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::new(Notifier::new("1001", spans_tx)).start(raw_rx, shutdown_rx);

        raw_tx.send(b"{broken".to_vec()).await.unwrap();
        raw_tx
            .send(payload(json!({ "data": [ { "trace_id": "t1", "span_id": "a" } ] })))
            .await
            .unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(1), spans_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].trace_id, "t1");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
