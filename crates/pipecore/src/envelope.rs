//! Data envelopes and the output truncation policy.
//!
//! An envelope keeps the full value for in-flight data flow next to a
//! bounded preview that is safe to persist. `DataEnvelope` deliberately does
//! not implement `Serialize`: only [`DataEnvelope::persistable`] and
//! [`DataEnvelope::summary`] ever leave the process.

use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bounds applied when building a preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewLimits {
    pub max_string_chars: usize,
    pub max_items: usize,
    pub max_depth: usize,
}

impl Default for PreviewLimits {
    fn default() -> Self {
        Self {
            max_string_chars: 512,
            max_items: 20,
            max_depth: 4,
        }
    }
}

/// Outputs whose compact JSON form exceeds `threshold_bytes` are persisted as
/// a truncation marker holding a preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TruncationPolicy {
    pub threshold_bytes: usize,
    pub preview: PreviewLimits,
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self {
            threshold_bytes: 64 * 1024,
            preview: PreviewLimits::default(),
        }
    }
}

/// Shape and typing information about an enveloped value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub value_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    pub serialized_size: usize,
    pub truncated: bool,
}

/// The value flowing along an edge.
#[derive(Debug, Clone)]
pub struct DataEnvelope {
    pub preview: Value,
    pub full: Value,
    pub metadata: EnvelopeMetadata,
}

impl DataEnvelope {
    pub fn wrap(value: Value, policy: &TruncationPolicy) -> Self {
        let size = value.serialized_size();
        let truncated = size > policy.threshold_bytes;

        let preview = if truncated {
            bounded_preview(&value, policy)
        } else {
            value.clone()
        };

        Self {
            metadata: EnvelopeMetadata {
                value_type: value.type_name().to_string(),
                length: value.len(),
                serialized_size: size,
                truncated,
            },
            preview,
            full: value,
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.metadata.truncated
    }

    /// Form written to `NodeExecutionRecord.outputs`.
    pub fn persistable(&self) -> Value {
        if !self.metadata.truncated {
            return self.preview.clone();
        }
        let mut marker = BTreeMap::new();
        marker.insert("truncated".to_string(), Value::Bool(true));
        marker.insert(
            "originalSize".to_string(),
            Value::from(self.metadata.serialized_size),
        );
        marker.insert("preview".to_string(), self.preview.clone());
        Value::Map(marker)
    }

    /// Metadata-only description used in run results.
    pub fn summary(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("type".to_string(), Value::from(self.metadata.value_type.as_str()));
        if let Some(length) = self.metadata.length {
            map.insert("length".to_string(), Value::from(length));
        }
        map.insert("size".to_string(), Value::from(self.metadata.serialized_size));
        map.insert("truncated".to_string(), Value::Bool(self.metadata.truncated));
        Value::Map(map)
    }
}

fn bounded_preview(value: &Value, policy: &TruncationPolicy) -> Value {
    let preview = value.preview(&policy.preview);
    if preview.serialized_size() <= policy.threshold_bytes {
        return preview;
    }
    // Structural trimming was not enough (very wide rows, long keys);
    // fall back to a prefix of the serialized text.
    let text = serde_json::to_string(&value.to_json()).unwrap_or_default();
    // Quotes plus the ellipsis
    let budget = policy.threshold_bytes.saturating_sub(5);
    let mut used = 0;
    let mut cut = 0;
    for (i, c) in text.char_indices() {
        used += escaped_len(c);
        if used > budget {
            break;
        }
        cut = i + c.len_utf8();
    }
    Value::String(format!("{}...", &text[..cut]))
}

/// Bytes `c` occupies inside a JSON string literal.
fn escaped_len(c: char) -> usize {
    match c {
        '"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0c}' => 2,
        c if (c as u32) < 0x20 => 6,
        c => c.len_utf8(),
    }
}
