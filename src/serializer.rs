use serde_json::Value;

use crate::{api::ApiResponse, validation::OutputFormat};

/// A rendered response body and the content type it is served with.
#[derive(Debug, PartialEq, Eq)]
pub struct Rendered {
    pub content_type: &'static str,
    pub body: String,
}

/// Renders the bundle in the requested format.
///
/// `text` only has something to say on success: a failed request renders an
/// empty body, not an error message.
///
/// # Errors
/// Will return [`Err`] if the bundle cannot be converted to JSON.
pub fn render(response: &ApiResponse, format: OutputFormat) -> serde_json::Result<Rendered> {
    Ok(match format {
        OutputFormat::Json => Rendered {
            content_type: "application/json",
            body: serde_json::to_string(response)?,
        },
        OutputFormat::Xml => Rendered {
            content_type: "text/xml; charset=utf-8",
            body: to_xml(&serde_json::to_value(response)?),
        },
        OutputFormat::Text => Rendered {
            content_type: "text/plain; charset=utf-8",
            body: match response {
                ApiResponse {
                    error: 0,
                    url: Some(url),
                    ..
                } => url.clone(),
                _ => String::new(),
            },
        },
    })
}

/// Each key of an object becomes `<key>value</key>`, in order, with nested
/// values rendered the same way inside their element. Array items use their
/// index as the element name. There is no root element.
///
/// Keys and values are interpolated as-is; nothing is escaped.
#[must_use]
pub fn to_xml(value: &Value) -> String {
    match value {
        Value::Object(fields) => fields.iter().map(|(key, value)| element(key, value)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| element(&index.to_string(), item))
            .collect(),
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(true) => "1".to_owned(),
        Value::Bool(false) | Value::Null => String::new(),
    }
}

fn element(key: &str, value: &Value) -> String {
    format!("<{key}>{}</{key}>", to_xml(value))
}
