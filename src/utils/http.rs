use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;

use crate::{PortraitError, Result};

pub(crate) const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;
pub(crate) const MAX_RESPONSE_BODY_BYTES: usize = 32 * 1024 * 1024;

/// `None` keeps reqwest's default (no overall deadline).
pub(crate) fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(PortraitError::Http)
}

pub(crate) async fn response_text_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> String {
    let (bytes, truncated) = response_bytes_truncated(response, max_bytes).await;
    let mut body = String::from_utf8_lossy(&bytes).to_string();
    if truncated {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str("...(truncated)");
    }
    body
}

async fn response_bytes_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let max_bytes = max_bytes.max(1);
    let mut out = Vec::<u8>::new();
    let mut truncated = false;

    let mut stream = response.bytes_stream();
    while let Some(next) = stream.next().await {
        let Ok(chunk) = next else {
            break;
        };
        let remaining = max_bytes.saturating_sub(out.len());
        if remaining == 0 {
            truncated = true;
            break;
        }
        if chunk.len() <= remaining {
            out.extend_from_slice(chunk.as_ref());
        } else {
            out.extend_from_slice(&chunk.as_ref()[..remaining]);
            truncated = true;
            break;
        }
    }
    (out, truncated)
}

/// Sends the request and turns any non-2xx status into `Upstream`.
pub(crate) async fn send_checked(req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = req.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response_text_truncated(response, MAX_ERROR_BODY_BYTES).await;
        return Err(PortraitError::Upstream { status, body });
    }
    Ok(response)
}

/// Reads a 2xx body as JSON. An empty body reads as `{}`; anything that is
/// not JSON is a protocol violation.
pub(crate) async fn read_json_body(response: reqwest::Response) -> Result<(Value, String)> {
    let text = response_text_truncated(response, MAX_RESPONSE_BODY_BYTES).await;
    let value = parse_json_lenient(&text).ok_or_else(|| {
        PortraitError::Protocol(format!("response is not json: {}", preview(&text)))
    })?;
    Ok((value, text))
}

pub(crate) async fn send_checked_json(req: reqwest::RequestBuilder) -> Result<(Value, String)> {
    let response = send_checked(req).await?;
    read_json_body(response).await
}

pub(crate) fn parse_json_lenient(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return Some(Value::Object(Default::default()));
    }
    serde_json::from_str(text).ok()
}

pub(crate) fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 512;
    let mut out: String = text.chars().take(MAX_CHARS).collect();
    if text.chars().count() > MAX_CHARS {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lenient_json_treats_blank_as_empty_object() {
        assert_eq!(parse_json_lenient("  "), Some(json!({})));
        assert_eq!(parse_json_lenient("{\"a\":1}"), Some(json!({ "a": 1 })));
        assert_eq!(parse_json_lenient("<html>"), None);
    }

    #[test]
    fn preview_caps_long_bodies() {
        let long = "x".repeat(600);
        let out = preview(&long);
        assert_eq!(out.len(), 515);
        assert!(out.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }
}
