//! Error types shared across ingestion, dosing and transport.
//!
//! Conversion failures are never propagated past the ingestion boundary:
//! callers map them to the fail-safe value (near-empty / zero quantity).
//! Transport failures are logged by the caller and never fatal.

/// A raw telemetry value could not be turned into a number.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    /// The value was missing or `null`.
    #[error("value is missing")]
    Missing,
    /// The value was present but not numeric.
    #[error("value {0:?} is not numeric")]
    NotNumeric(String),
    /// The value parsed but is NaN or infinite.
    #[error("value is not finite")]
    NotFinite,
}

/// Delivering a message to an external system failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The command channel is currently disconnected; nothing was queued.
    #[error("command channel is disconnected")]
    Disconnected,
    /// The MQTT client rejected the request.
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    /// HTTP transport failure.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The remote answered with a non-success status.
    #[error("remote responded {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },
    /// The payload could not be serialized.
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Parse a JSON value as a finite `f64`.
///
/// Accepts numbers and numeric strings (surrounding whitespace allowed).
///
/// # Errors
///
/// Returns [`ConversionError`] for `null`, non-numeric, or non-finite input.
pub fn value_as_f64(value: &serde_json::Value) -> Result<f64, ConversionError> {
    let parsed = match value {
        serde_json::Value::Null => return Err(ConversionError::Missing),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ConversionError::NotNumeric(n.to_string()))?,
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ConversionError::NotNumeric(s.clone()))?,
        other => return Err(ConversionError::NotNumeric(other.to_string())),
    };

    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(ConversionError::NotFinite)
    }
}
