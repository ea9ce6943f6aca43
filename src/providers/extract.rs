//! Response-shape normalization shared by the adapters.
//!
//! Providers answer with a handful of loosely related JSON layouts. Each
//! layout is parsed here, once, with a fixed precedence:
//!
//! 1. a flat `image_url` field,
//! 2. the first entry of a `data` / `images` / `result` array, taking
//!    `url` or `image_url` before `b64_json` or `base64`,
//! 3. a flat `image_base64` field.

use serde_json::Value;

use crate::types::ProviderResult;

const CANDIDATE_ARRAYS: &[&str] = &["data", "images", "result"];
const ENTRY_URL_FIELDS: &[&str] = &["url", "image_url"];
const ENTRY_BASE64_FIELDS: &[&str] = &["b64_json", "base64"];

pub fn extract_image(value: &Value) -> Option<ProviderResult> {
    if let Some(url) = non_empty_str(value.get("image_url")) {
        return Some(ProviderResult::url(url));
    }
    if let Some(entry) = first_candidate(value) {
        if let Some(found) = extract_entry(entry) {
            return Some(found);
        }
    }
    non_empty_str(value.get("image_base64")).map(ProviderResult::base64)
}

fn first_candidate(value: &Value) -> Option<&Value> {
    CANDIDATE_ARRAYS
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_array))
        .and_then(|items| items.first())
}

fn extract_entry(entry: &Value) -> Option<ProviderResult> {
    if let Some(url) = ENTRY_URL_FIELDS
        .iter()
        .find_map(|key| non_empty_str(entry.get(*key)))
    {
        return Some(ProviderResult::url(url));
    }
    ENTRY_BASE64_FIELDS
        .iter()
        .find_map(|key| non_empty_str(entry.get(*key)))
        .map(ProviderResult::base64)
}

/// Multimodal generate-content shape: the first inline data part of the
/// first candidate.
pub fn extract_inline_image(value: &Value) -> Option<ProviderResult> {
    let parts = value
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    parts.iter().find_map(|part| {
        let inline = part.get("inlineData").or_else(|| part.get("inline_data"))?;
        let data = non_empty_str(inline.get("data"))?;
        let media_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or("image/png");
        Some(ProviderResult::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        })
    })
}

pub(crate) fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_url_wins_over_array_and_base64() {
        let value = json!({
            "image_url": "https://flat.example/a.png",
            "data": [{ "url": "https://array.example/b.png" }],
            "image_base64": "ZmxhdA=="
        });
        assert_eq!(
            extract_image(&value),
            Some(ProviderResult::url("https://flat.example/a.png"))
        );
    }

    #[test]
    fn array_entry_prefers_url_over_base64() {
        let value = json!({
            "data": [{ "b64_json": "YQ==", "image_url": "https://array.example/b.png" }],
            "image_base64": "ZmxhdA=="
        });
        assert_eq!(
            extract_image(&value),
            Some(ProviderResult::url("https://array.example/b.png"))
        );
    }

    #[test]
    fn array_entry_base64_beats_flat_base64() {
        let value = json!({ "images": [{ "base64": "YQ==" }], "image_base64": "ZmxhdA==" });
        assert_eq!(extract_image(&value), Some(ProviderResult::base64("YQ==")));
    }

    #[test]
    fn falls_back_to_flat_base64() {
        let value = json!({ "result": [], "image_base64": "ZmxhdA==" });
        assert_eq!(extract_image(&value), Some(ProviderResult::base64("ZmxhdA==")));
    }

    #[test]
    fn unknown_shapes_yield_nothing() {
        assert_eq!(extract_image(&json!({ "data": [{ "id": 1 }] })), None);
        assert_eq!(extract_image(&json!({ "image_url": "  " })), None);
        assert_eq!(extract_image(&json!([])), None);
    }

    #[test]
    fn inline_image_skips_text_parts() {
        let value = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/jpeg", "data": "/9j/" } }
                ]}
            }]
        });
        assert_eq!(
            extract_inline_image(&value),
            Some(ProviderResult::Base64 {
                media_type: "image/jpeg".to_string(),
                data: "/9j/".to_string()
            })
        );
        assert_eq!(
            extract_inline_image(&json!({ "candidates": [{ "content": { "parts": [{ "text": "no" }] } }] })),
            None
        );
    }
}
