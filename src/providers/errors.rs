use crate::errors::CrucibleError;
use serde_json::Value;

/// Lower a transport-level failure into the error taxonomy.
pub fn lower_transport_error(provider: &str, err: &reqwest::Error) -> CrucibleError {
    if err.is_timeout() {
        CrucibleError::ProviderTimeout {
            provider: provider.to_string(),
            elapsed_ms: 0,
        }
    } else if err.is_connect() {
        CrucibleError::ProviderUnavailable {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    } else {
        CrucibleError::ProviderProtocol {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

/// Check an HTTP response status and decode the JSON body, lowering
/// provider-level failures into the taxonomy.
pub async fn check_response(
    provider: &str,
    response: reqwest::Response,
) -> Result<Value, CrucibleError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), truncate(&body, 500));
        return Err(if status.as_u16() == 503 {
            CrucibleError::ProviderUnavailable {
                provider: provider.to_string(),
                message,
            }
        } else {
            CrucibleError::ProviderProtocol {
                provider: provider.to_string(),
                message,
            }
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| CrucibleError::ProviderProtocol {
            provider: provider.to_string(),
            message: format!("malformed JSON body: {e}"),
        })
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}
