//! Form bodies for the delivery surfaces.

use courier_core::{SessionEnvelope, WrappedBatch};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Body for the wrapped-batch surface: `q=<json batches>&ts=<ms>`.
pub fn batch_body(batches: &[WrappedBatch], ts_ms: i64) -> serde_json::Result<String> {
    let encoded = serde_json::to_string(batches)?;
    Ok(format!("q={}&ts={ts_ms}", form_encode(&encoded)))
}

/// Body for a session-packaged surface: `p=<json envelope>`.
pub fn envelope_body(envelope: &SessionEnvelope) -> serde_json::Result<String> {
    let encoded = serde_json::to_string(envelope)?;
    Ok(format!("p={}", form_encode(&encoded)))
}

/// Join a surface path onto the configured base URL. An empty base leaves
/// the path untouched for hosts that hand absolute paths to their own
/// transport.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    if base.is_empty() {
        path.to_owned()
    } else {
        format!("{}{path}", base.trim_end_matches('/'))
    }
}

// Over-encodes the unreserved marks, which every form parser accepts.
fn form_encode(raw: &str) -> String {
    utf8_percent_encode(raw, NON_ALPHANUMERIC).to_string()
}
