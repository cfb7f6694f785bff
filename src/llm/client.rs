use crate::error::{LlmError, Result};
use crate::llm::types::{ChatCompletionRequest, ChatCompletionResponse};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// 错误诊断信息的最大长度，避免把整段上游响应写进日志
const DIAGNOSTIC_LIMIT: usize = 100;

pub async fn post(
    client: Arc<Client>,
    request_body: &ChatCompletionRequest,
    header_map: HeaderMap,
    url: &str,
) -> Result<ChatCompletionResponse> {
    let response = client
        .post(url)
        .headers(header_map)
        .json(request_body)
        .send()
        .await?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let header_hint = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        let retry_after = header_hint
            .filter(|h| h.chars().all(|c| c.is_ascii_digit()) && !h.is_empty())
            .unwrap_or_else(|| parse_retry_hint(&body));
        return Err(LlmError::RateLimited { retry_after }.into());
    }

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = if status == StatusCode::BAD_REQUEST {
            error_message(&error_text).unwrap_or(error_text)
        } else {
            error_text
        };
        return Err(LlmError::ApiError {
            status: status.as_u16(),
            message: truncate_diagnostic(&message),
        }
        .into());
    }

    let completion_response = response
        .json::<ChatCompletionResponse>()
        .await
        .map_err(|e| LlmError::InvalidResponse(truncate_diagnostic(&e.to_string())))?;

    debug!(choices = completion_response.choices.len(), "收到补全响应");

    Ok(completion_response)
}

/// 从限流响应体中解析等待秒数。
///
/// 上游格式形如 `{"error": {"details": "... Please wait 42 seconds before retrying."}}`，
/// 任何解析失败都返回 `"unknown"`。
pub fn parse_retry_hint(body: &str) -> String {
    let details = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("details"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default();

    details
        .rsplit_once("wait ")
        .map(|(_, rest)| rest.split(' ').next().unwrap_or_default())
        .filter(|secs| !secs.is_empty() && secs.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

pub(crate) fn truncate_diagnostic(text: &str) -> String {
    text.chars().take(DIAGNOSTIC_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_hint() {
        let body = r#"{"error":{"code":"RateLimitReached","details":"Rate limit of 50 per 86400s exceeded. Please wait 3600 seconds before retrying."}}"#;
        assert_eq!(parse_retry_hint(body), "3600");
    }

    #[test]
    fn test_parse_retry_hint_unknown() {
        assert_eq!(parse_retry_hint("not json"), "unknown");
        assert_eq!(parse_retry_hint(r#"{"error":{"details":"slow down"}}"#), "unknown");
        assert_eq!(parse_retry_hint(r#"{"error":{"details":"wait soon"}}"#), "unknown");
        assert_eq!(parse_retry_hint(r#"{"error":{}}"#), "unknown");
    }

    #[test]
    fn test_error_message_extracted() {
        let body = r#"{"error":{"message":"model not supported"}}"#;
        assert_eq!(error_message(body).as_deref(), Some("model not supported"));
        assert_eq!(error_message("plain"), None);
    }

    #[test]
    fn test_truncate_diagnostic_is_char_safe() {
        let long = "ข".repeat(150);
        assert_eq!(truncate_diagnostic(&long).chars().count(), 100);
    }
}
