//! Tolerant extraction of predicted codes from free-text model output.
//!
//! Models wrap the JSON in prose or markdown fences and sometimes return
//! codes as numbers. The parser scans for the first well-formed JSON array
//! of objects (or a `{"codes": [...]}` wrapper) and normalizes each element.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::codes::PredictedCode;

/// Object keys accepted for the CPT code, in preference order
const CODE_KEYS: [&str; 3] = ["code", "cpt", "cptCode"];

/// Object wrappers some models put around the array
const WRAPPER_KEYS: [&str; 2] = ["codes", "cpt_codes"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PredictionParseError {
    #[error("No JSON array of codes found in response ({0} chars)")]
    NoArray(usize),

    #[error("None of the {0} response elements carried a code")]
    MissingCode(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCodes {
    pub codes: Vec<PredictedCode>,
    /// Elements discarded because they had no usable code
    pub dropped: usize,
}

/// Parse the model response into codes, preserving response order.
pub fn parse_codes(response: &str) -> Result<ParsedCodes, PredictionParseError> {
    let items = find_code_array(response).ok_or(PredictionParseError::NoArray(response.len()))?;

    let total = items.len();
    let codes: Vec<PredictedCode> = items.iter().filter_map(code_from_element).collect();
    let dropped = total - codes.len();

    if total > 0 && codes.is_empty() {
        return Err(PredictionParseError::MissingCode(total));
    }
    if dropped > 0 {
        warn!(dropped, total, "Dropped response elements without a code");
    }

    Ok(ParsedCodes { codes, dropped })
}

/// First JSON array in `text` whose elements are objects.
///
/// Every `[` and `{` is tried as a value start; prose brackets such as
/// `[see attached]` simply fail to parse and the scan moves on.
pub fn find_code_array(text: &str) -> Option<Vec<Value>> {
    for (start, c) in text.char_indices() {
        if c != '[' && c != '{' {
            continue;
        }
        let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(Value::Array(items))) if is_code_list(&items) => return Some(items),
            Some(Ok(Value::Object(map))) => {
                let wrapped = WRAPPER_KEYS
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_array));
                if let Some(items) = wrapped {
                    if is_code_list(items) {
                        return Some(items.clone());
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn is_code_list(items: &[Value]) -> bool {
    items.is_empty() || items.iter().any(Value::is_object)
}

fn code_from_element(element: &Value) -> Option<PredictedCode> {
    let object = element.as_object()?;
    let code = CODE_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(scalar_text))?;

    let modifier1 = object.get("modifier1").and_then(scalar_text);
    let modifier2 = object.get("modifier2").and_then(scalar_text);
    let description = object
        .get("description")
        .and_then(scalar_text)
        .unwrap_or_default();

    Some(
        PredictedCode::new(code)
            .with_modifiers(modifier1.as_deref(), modifier2.as_deref())
            .with_description(description),
    )
}

/// Strings and numbers as trimmed text; anything else (or blank) is `None`.
fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u.to_string()
            } else if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => format!("{f:.0}"),
                    _ => n.to_string(),
                }
            }
        }
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
