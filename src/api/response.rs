//! Typed view of the JSON returned for every uploaded chunk.

use serde_json::Value;

/// Server verdict for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResponse {
    /// Falsy `status`; `url` is only present on the logically last chunk.
    Success { url: Option<String> },
    /// Truthy `status`.
    Rejected { reason: String },
    /// Not a JSON object, or no `status` field.
    Malformed,
}

impl ChunkResponse {
    /// Parse a response body.
    pub fn parse(body: &str) -> Self {
        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(_) => return ChunkResponse::Malformed,
        };
        let Some(object) = value.as_object() else {
            return ChunkResponse::Malformed;
        };
        let Some(status) = object.get("status") else {
            return ChunkResponse::Malformed;
        };

        if is_truthy(status) {
            return ChunkResponse::Rejected {
                reason: value.to_string(),
            };
        }

        let url = object
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        ChunkResponse::Success { url }
    }

    /// Download page URL, if this response carries one.
    pub fn url(&self) -> Option<&str> {
        match self {
            ChunkResponse::Success { url } => url.as_deref(),
            _ => None,
        }
    }
}

/// The service reports failure with any "truthy" status value.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_without_url() {
        assert_eq!(
            ChunkResponse::parse(r#"{"status":0}"#),
            ChunkResponse::Success { url: None }
        );
        assert_eq!(
            ChunkResponse::parse(r#"{"status":false,"url":""}"#),
            ChunkResponse::Success { url: None }
        );
    }

    #[test]
    fn test_success_with_url() {
        let response = ChunkResponse::parse(r#"{"status":0,"url":"https://46.gigafile.nu/0123-abc"}"#);
        assert_eq!(response.url(), Some("https://46.gigafile.nu/0123-abc"));
    }

    #[test]
    fn test_rejected() {
        match ChunkResponse::parse(r#"{"status":1,"message":"expired"}"#) {
            ChunkResponse::Rejected { reason } => assert!(reason.contains("expired")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            ChunkResponse::parse(r#"{"status":"0"}"#),
            ChunkResponse::Rejected { .. }
        ));
    }

    #[test]
    fn test_malformed() {
        assert_eq!(ChunkResponse::parse("<html>502</html>"), ChunkResponse::Malformed);
        assert_eq!(ChunkResponse::parse("[0]"), ChunkResponse::Malformed);
        assert_eq!(ChunkResponse::parse(r#"{"url":"x"}"#), ChunkResponse::Malformed);
        assert_eq!(ChunkResponse::Malformed.url(), None);
    }
}
