//! `reqwest` transport with a bounded beacon queue.
//!
//! Awaited posts go straight through the client. Beacons are queued onto a
//! bounded channel drained by a detached task, so the caller's teardown path
//! never blocks on the network; a full queue refuses the send and the
//! refusal is the caller's signal to persist instead.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::mpsc;
use tracing::warn;

use crate::transport::{Result, Transport, TransportError, FORM_CONTENT_TYPE};

/// Counter of beacon bodies the queue refused.
pub const METRIC_BEACON_REFUSALS: &str = "courier_beacon_queue_refusals_total";
/// Counter of drained beacon sends, labeled by outcome.
pub const METRIC_BEACON_SENDS: &str = "courier_beacon_sends_total";

struct BeaconJob {
    url: String,
    body: String,
}

/// HTTP transport for both delivery paths.
pub struct HttpTransport {
    client: reqwest::Client,
    beacon_tx: mpsc::Sender<BeaconJob>,
}

impl HttpTransport {
    /// Build the client and spawn the beacon drainer on the current runtime.
    pub fn spawn(send_timeout: Option<Duration>, beacon_queue_depth: usize) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = send_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|error| TransportError::Setup(error.to_string()))?;

        let (beacon_tx, beacon_rx) = mpsc::channel(beacon_queue_depth.max(1));
        let _ = tokio::spawn(drain_beacons(client.clone(), beacon_rx));

        Ok(Self { client, beacon_tx })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, body: String) -> Result<()> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|error| TransportError::Unreachable(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                code: status.as_u16(),
            })
        }
    }

    fn send_beacon(&self, url: &str, body: String) -> bool {
        let job = BeaconJob {
            url: url.to_owned(),
            body,
        };
        match self.beacon_tx.try_send(job) {
            Ok(()) => true,
            Err(error) => {
                warn!(url, %error, "beacon queue refused the send");
                counter!(METRIC_BEACON_REFUSALS).increment(1);
                false
            }
        }
    }
}

/// Runs until every sender is gone, then exits with the transport.
async fn drain_beacons(client: reqwest::Client, mut jobs: mpsc::Receiver<BeaconJob>) {
    while let Some(job) = jobs.recv().await {
        let outcome = client
            .post(&job.url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(job.body)
            .send()
            .await;
        match outcome {
            Ok(response) if response.status().is_success() => {
                counter!(METRIC_BEACON_SENDS, "outcome" => "ok").increment(1);
            }
            Ok(response) => {
                warn!(url = %job.url, status = response.status().as_u16(), "beacon rejected");
                counter!(METRIC_BEACON_SENDS, "outcome" => "rejected").increment(1);
            }
            Err(error) => {
                warn!(url = %job.url, %error, "beacon failed");
                counter!(METRIC_BEACON_SENDS, "outcome" => "failed").increment(1);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    async fn mock_endpoint(status: u16) -> wiremock::MockServer {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/telemetry/batch"))
            .and(wiremock::matchers::header(
                "content-type",
                FORM_CONTENT_TYPE,
            ))
            .respond_with(wiremock::ResponseTemplate::new(status))
            .mount(&server)
            .await;
        server
    }

    // ── post ──

    #[tokio::test]
    async fn post_resolves_ok_on_2xx() {
        let server = mock_endpoint(204).await;
        let transport = HttpTransport::spawn(None, 4).unwrap();
        let url = format!("{}/telemetry/batch", server.uri());
        transport.post(&url, "q=%5B%5D&ts=1".into()).await.unwrap();
    }

    #[tokio::test]
    async fn post_surfaces_rejection_status() {
        let server = mock_endpoint(503).await;
        let transport = HttpTransport::spawn(None, 4).unwrap();
        let url = format!("{}/telemetry/batch", server.uri());
        let err = transport.post(&url, "q=%5B%5D&ts=1".into()).await.unwrap_err();
        assert_matches!(err, TransportError::Status { code: 503 });
    }

    #[tokio::test]
    async fn post_maps_connect_failure_to_unreachable() {
        let transport = HttpTransport::spawn(None, 4).unwrap();
        let err = transport
            .post("http://127.0.0.1:1/telemetry/batch", "q=%5B%5D&ts=1".into())
            .await
            .unwrap_err();
        assert_matches!(err, TransportError::Unreachable(_));
    }

    // ── beacon queue ──

    #[tokio::test]
    async fn accepted_beacons_are_drained_to_the_endpoint() {
        let server = mock_endpoint(200).await;
        let transport = HttpTransport::spawn(None, 4).unwrap();
        let url = format!("{}/telemetry/batch", server.uri());

        assert!(transport.send_beacon(&url, "q=%5B%5D&ts=9".into()));

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let seen = server.received_requests().await.unwrap_or_default();
                if !seen.is_empty() {
                    assert_eq!(seen[0].body, b"q=%5B%5D&ts=9");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn full_queue_refuses_the_send() {
        // Current-thread runtime: the drainer cannot run between these
        // synchronous calls, so the second try_send sees a full queue.
        let transport = HttpTransport::spawn(None, 1).unwrap();
        assert!(transport.send_beacon("http://127.0.0.1:1/x", "a=1".into()));
        assert!(!transport.send_beacon("http://127.0.0.1:1/x", "a=2".into()));
    }
}
