//! Envelopes exchanged at the start of every call channel.
//!
//! Caller → responder: [`CallHeader`], then one params value.
//! Responder → caller: [`ResponseHeader`], then one reply value (null on error).
//! When `continue` is set, both sides may keep exchanging values or raw bytes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHeader {
    pub selector: String,
}

impl CallHeader {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    #[serde(default)]
    pub error: Option<String>,
    /// The channel stays open for streaming after the reply.
    #[serde(rename = "continue", default)]
    pub continued: bool,
}

impl ResponseHeader {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            continued: false,
        }
    }

    pub fn continued() -> Self {
        Self {
            error: None,
            continued: true,
        }
    }
}

/// Selectors are path-like and always start with `/`.
pub fn normalize_selector(selector: &str) -> String {
    if selector.starts_with('/') {
        selector.to_string()
    } else {
        format!("/{selector}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_header_serializes() {
        insta::assert_json_snapshot!(CallHeader::new("/Unary"), @r#"
        {
          "selector": "/Unary"
        }
        "#);
    }

    #[test]
    fn error_response_serializes() {
        insta::assert_json_snapshot!(ResponseHeader::error("boom"), @r#"
        {
          "error": "boom",
          "continue": false
        }
        "#);
    }

    #[test]
    fn continued_response_serializes() {
        insta::assert_json_snapshot!(ResponseHeader::continued(), @r#"
        {
          "error": null,
          "continue": true
        }
        "#);
    }

    #[test]
    fn missing_fields_default() {
        let header: ResponseHeader = serde_json::from_str("{}").unwrap();
        assert_eq!(header, ResponseHeader::ok());
    }

    #[test]
    fn selectors_gain_leading_slash() {
        assert_eq!(normalize_selector("Unary"), "/Unary");
        assert_eq!(normalize_selector("/Unary"), "/Unary");
        assert_eq!(normalize_selector(""), "/");
    }
}
