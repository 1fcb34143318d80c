//! Wire payload decoding
//!
//! `recordData` arrives either as a JSON object or as an XML document.
//! Both shapes decode into a flat, insertion-ordered column→value map.
//! When the payload carries a `<new>…</new>`/`<old>…</old>` envelope, keys
//! under `<old>` land in the map with an `old_` prefix; the dispatcher uses
//! them as the UPDATE pre-image.
//!
//! The XML grammar is deliberately minimal: a sequence of `<tag>value</tag>`
//! pairs, optionally inside a single wrapper element, with `new`/`old`
//! sub-envelopes. Attributes and deeper nesting are rejected.

use serde_json::Value;
use thiserror::Error;

/// Flat column→value map; insertion order is payload order.
pub type FlatRecord = serde_json::Map<String, Value>;

/// Errors raised while decoding a wire payload
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed XML payload: {0}")]
    Xml(String),

    #[error("unsupported payload shape: {0}")]
    Shape(String),
}

/// Decode `recordData` into a flat map.
///
/// Accepts a JSON object (possibly with `new`/`old` sub-objects), or a
/// string holding either an XML document or serialized JSON.
pub fn decode_record(raw: &Value) -> Result<FlatRecord, PayloadError> {
    match raw {
        Value::Object(obj) => Ok(flatten_json(obj)),
        Value::String(s) => {
            let trimmed = s.trim_start_matches('\u{feff}').trim();
            if trimmed.starts_with('<') {
                decode_xml_record(trimmed)
            } else {
                let parsed: Value = serde_json::from_str(trimmed)
                    .map_err(|e| PayloadError::Shape(format!("invalid JSON string: {e}")))?;
                match parsed {
                    Value::Object(obj) => Ok(flatten_json(&obj)),
                    other => Err(PayloadError::Shape(format!(
                        "expected JSON object, got {other}"
                    ))),
                }
            }
        }
        other => Err(PayloadError::Shape(format!(
            "expected object or string, got {other}"
        ))),
    }
}

fn flatten_json(obj: &serde_json::Map<String, Value>) -> FlatRecord {
    let mut map = FlatRecord::new();
    for (key, value) in obj {
        match (key.as_str(), value) {
            ("new", Value::Object(inner)) => {
                for (k, v) in inner {
                    map.insert(k.clone(), v.clone());
                }
            }
            ("old", Value::Object(inner)) => {
                for (k, v) in inner {
                    map.insert(format!("old_{k}"), v.clone());
                }
            }
            _ => {
                map.insert(key.clone(), value.clone());
            }
        }
    }
    map
}

/// Decode an XML document into a flat map per the minimal wire grammar.
pub fn decode_xml_record(xml: &str) -> Result<FlatRecord, PayloadError> {
    let mut elements = parse_document(xml)?;

    // A single wrapper element (e.g. <row>…</row>) is transparent.
    if elements.len() == 1
        && !elements[0].children.is_empty()
        && elements[0].name != "new"
        && elements[0].name != "old"
    {
        elements = std::mem::take(&mut elements[0].children);
    }

    let mut map = FlatRecord::new();
    for element in elements {
        match element.name.as_str() {
            "new" => {
                for child in element.children {
                    map.insert(child.name.clone(), leaf_value(child)?);
                }
            }
            "old" => {
                for child in element.children {
                    map.insert(format!("old_{}", child.name), leaf_value(child)?);
                }
            }
            _ => {
                let name = element.name.clone();
                map.insert(name, leaf_value(element)?);
            }
        }
    }
    Ok(map)
}

fn leaf_value(element: XmlElement) -> Result<Value, PayloadError> {
    if !element.children.is_empty() {
        return Err(PayloadError::Xml(format!(
            "unexpected nested element under <{}>",
            element.name
        )));
    }
    Ok(Value::String(element.text))
}

struct XmlElement {
    name: String,
    text: String,
    children: Vec<XmlElement>,
}

/// Parse the top-level element sequence, skipping an optional prolog.
fn parse_document(input: &str) -> Result<Vec<XmlElement>, PayloadError> {
    let mut cursor = Cursor { rest: input };
    cursor.skip_whitespace();
    if cursor.rest.starts_with("<?") {
        let end = cursor
            .rest
            .find("?>")
            .ok_or_else(|| PayloadError::Xml("unterminated prolog".into()))?;
        cursor.rest = &cursor.rest[end + 2..];
    }

    let mut elements = Vec::new();
    loop {
        cursor.skip_whitespace();
        if cursor.rest.is_empty() {
            break;
        }
        elements.push(cursor.parse_element()?);
    }
    if elements.is_empty() {
        return Err(PayloadError::Xml("empty document".into()));
    }
    Ok(elements)
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn parse_element(&mut self) -> Result<XmlElement, PayloadError> {
        let Some(after_open) = self.rest.strip_prefix('<') else {
            return Err(PayloadError::Xml(format!(
                "expected element, found {:?}",
                truncate(self.rest)
            )));
        };

        let tag_end = after_open
            .find('>')
            .ok_or_else(|| PayloadError::Xml("unterminated tag".into()))?;
        let raw_tag = &after_open[..tag_end];

        // <tag/> carries no value
        if let Some(name) = raw_tag.strip_suffix('/') {
            let name = validate_name(name.trim())?;
            self.rest = &after_open[tag_end + 1..];
            return Ok(XmlElement {
                name,
                text: String::new(),
                children: Vec::new(),
            });
        }

        let name = validate_name(raw_tag.trim())?;
        self.rest = &after_open[tag_end + 1..];

        let close = format!("</{name}>");
        let lookahead = self.rest.trim_start();
        if lookahead.starts_with('<') && !lookahead.starts_with("</") {
            // Element children until the matching close tag.
            let mut children = Vec::new();
            loop {
                self.skip_whitespace();
                if let Some(after_close) = self.rest.strip_prefix(close.as_str()) {
                    self.rest = after_close;
                    return Ok(XmlElement {
                        name,
                        text: String::new(),
                        children,
                    });
                }
                if self.rest.is_empty() {
                    return Err(PayloadError::Xml(format!("missing {close}")));
                }
                children.push(self.parse_element()?);
            }
        }

        // Text content.
        let end = self
            .rest
            .find(close.as_str())
            .ok_or_else(|| PayloadError::Xml(format!("missing {close}")))?;
        let text = unescape(self.rest[..end].trim());
        self.rest = &self.rest[end + close.len()..];
        Ok(XmlElement {
            name,
            text,
            children: Vec::new(),
        })
    }
}

fn validate_name(name: &str) -> Result<String, PayloadError> {
    if name.is_empty()
        || name.starts_with('/')
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(PayloadError::Xml(format!("invalid tag name {name:?}")));
    }
    Ok(name.to_string())
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn truncate(s: &str) -> &str {
    &s[..s.len().min(24)]
}
