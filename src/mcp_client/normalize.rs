//! Tool result normalization.
//!
//! Turns a raw `tools/call` result into a [`CallResult`]: text blocks joined
//! by newlines for the model, inline binary blocks collected in order, and
//! the original value kept untouched in `raw`.

use serde::Deserialize;

use super::types::{BinaryItem, CallResult};

/// One content block of a tool result, as far as normalization cares.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Binary {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// Normalize a raw call result.
///
/// Blocks of any other kind (resources, resource links, malformed blocks)
/// are left out of `text_content` and `binary_items` and survive only in
/// `raw`.
pub fn normalize_call_result(raw: serde_json::Value) -> CallResult {
    let mut texts: Vec<String> = Vec::new();
    let mut binary_items = Vec::new();
    let mut skipped = 0usize;

    let blocks = raw
        .get("content")
        .and_then(|c| c.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    for block in blocks {
        match ContentBlock::deserialize(block) {
            Ok(ContentBlock::Text { text }) => texts.push(text),
            Ok(ContentBlock::Image { data, mime_type })
            | Ok(ContentBlock::Audio { data, mime_type })
            | Ok(ContentBlock::Binary { data, mime_type }) => {
                binary_items.push(BinaryItem { data, mime_type })
            }
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, "content blocks kept only in raw result");
    }

    let is_error = raw
        .get("isError")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    CallResult {
        text_content: texts.join("\n"),
        binary_items,
        raw,
        is_error,
    }
}
