//! Shared pieces of the HTTP-based senders

use contracts::{DeliveryResult, Record};
use reqwest::StatusCode;
use serde_json::{json, Value};

/// JSON envelope posted for one record
pub fn envelope(record: &Record) -> Value {
    json!({
        "timestamp": record.enqueued_at().to_rfc3339(),
        "record_id": record.id(),
        "data": record.payload().to_json_value(),
    })
}

/// Map a response status to a delivery outcome
///
/// 408, 429 and 5xx are worth retrying; any other 4xx is a permanent
/// rejection of the request.
pub fn classify_status(status: StatusCode) -> DeliveryResult {
    if status.is_success() {
        return DeliveryResult::Delivered;
    }

    let reason = format!("endpoint returned {status}");
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            DeliveryResult::retriable(reason)
        }
        s if s.is_server_error() => DeliveryResult::retriable(reason),
        s if s.is_client_error() => DeliveryResult::fatal(reason),
        _ => DeliveryResult::retriable(reason),
    }
}

/// Map a transport error to a delivery outcome
///
/// Only a request that could not even be built is permanent.
pub fn classify_transport_error(err: &reqwest::Error) -> DeliveryResult {
    if err.is_builder() {
        DeliveryResult::fatal(format!("invalid request: {err}"))
    } else if err.is_timeout() {
        DeliveryResult::retriable(format!("request timed out: {err}"))
    } else {
        DeliveryResult::retriable(format!("transport error: {err}"))
    }
}
