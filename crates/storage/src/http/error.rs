//! Classification of non-success store responses.

use reqwest::StatusCode;
use serde::Deserialize;

use crate::repository::StorageError;

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<ErrorDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetails {
    #[serde(default)]
    key: Option<String>,
}

const INVALID_KEY_PREFIX: &str = "Invalid key";

/// Offending key of a validation error. Older servers only put it in the
/// message (`Invalid key eleves`).
fn invalid_key(body: &ErrorBody) -> Option<String> {
    if let Some(key) = body.details.as_ref().and_then(|d| d.key.clone()) {
        return Some(key);
    }
    let rest = body.message.as_deref()?.trim().strip_prefix(INVALID_KEY_PREFIX)?;
    let key = rest.trim_start_matches(':').trim();
    Some(if key.is_empty() { "unknown".to_string() } else { key.to_string() })
}

/// Map a failed response onto a `StorageError`.
pub(crate) fn classify(status: StatusCode, raw: &str) -> StorageError {
    let body = serde_json::from_str::<ErrorEnvelope>(raw)
        .ok()
        .and_then(|envelope| envelope.error)
        .unwrap_or_default();
    let message = body
        .message
        .clone()
        .filter(|m| !m.trim().is_empty())
        .or_else(|| status.canonical_reason().map(str::to_owned))
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::Unauthorized { message },
        StatusCode::NOT_FOUND => StorageError::NotFound,
        StatusCode::BAD_REQUEST => {
            let validation = body.name.as_deref() == Some("ValidationError");
            match invalid_key(&body) {
                Some(key) if validation || message.starts_with(INVALID_KEY_PREFIX) => {
                    StorageError::InvalidKey { key }
                }
                _ => StorageError::Rejected {
                    status: status.as_u16(),
                    message,
                },
            }
        }
        _ => StorageError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

pub(crate) fn transport(err: &reqwest::Error) -> StorageError {
    if err.is_connect() {
        StorageError::Connection(err.to_string())
    } else if err.is_decode() {
        StorageError::Serialization(err.to_string())
    } else {
        StorageError::Transport(err.to_string())
    }
}
