//! Payload the gateway forwards for HTTP-originated requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An HTTP request flattened into a message payload.
///
/// Handlers on the receiving side read the original path, method, headers and
/// query string from here, alongside the parsed body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRequest {
    /// Parsed JSON body, or the raw body as a string if it was not JSON
    #[serde(default)]
    pub body: Value,
    /// Request path (e.g. `/api/recipes/123`)
    #[serde(default)]
    pub path: String,
    /// HTTP method in upper case
    #[serde(default)]
    pub method: String,
    /// Request headers (last value wins for repeated headers)
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Query parameters (last value wins for repeated parameters)
    #[serde(default)]
    pub query_params: HashMap<String, String>,
}

impl EnrichedRequest {
    /// First all-digit path segment, parsed as an id.
    ///
    /// ```
    /// use courier_core::enriched::EnrichedRequest;
    ///
    /// let request = EnrichedRequest { path: "/api/recipes/123/comments".into(), ..Default::default() };
    /// assert_eq!(request.id_from_path(), Some(123));
    /// ```
    #[must_use]
    pub fn id_from_path(&self) -> Option<i64> {
        self.path
            .split('/')
            .find(|segment| is_numeric(segment))
            .and_then(|segment| segment.parse().ok())
    }

    /// Last path segment parsed as an id, if it is all digits.
    #[must_use]
    pub fn id_from_last_segment(&self) -> Option<i64> {
        self.path
            .rsplit('/')
            .next()
            .filter(|segment| is_numeric(segment))
            .and_then(|segment| segment.parse().ok())
    }

    /// Field of an object body.
    #[must_use]
    pub fn body_field(&self, name: &str) -> Option<&Value> {
        self.body.as_object().and_then(|body| body.get(name))
    }

    /// Query parameter by name.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }
}

pub(crate) fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn extracts_ids_from_path() {
        let request = EnrichedRequest {
            path: "/api/recipes/42".into(),
            ..Default::default()
        };
        assert_eq!(request.id_from_path(), Some(42));
        assert_eq!(request.id_from_last_segment(), Some(42));

        let nested = EnrichedRequest {
            path: "/api/recipes/42/comments".into(),
            ..Default::default()
        };
        assert_eq!(nested.id_from_path(), Some(42));
        assert_eq!(nested.id_from_last_segment(), None);

        assert_eq!(EnrichedRequest::default().id_from_path(), None);
    }

    #[test]
    fn reads_body_fields_and_query() {
        let request = EnrichedRequest {
            body: json!({ "title": "Kimchi" }),
            query_params: HashMap::from([("page".to_string(), "2".to_string())]),
            ..Default::default()
        };
        assert_eq!(request.body_field("title"), Some(&json!("Kimchi")));
        assert_eq!(request.body_field("missing"), None);
        assert_eq!(request.query_param("page"), Some("2"));
    }

    proptest! {
        #[test]
        fn first_numeric_segment_is_the_id(
            words in prop::collection::vec("[a-z]{1,8}", 0..4),
            id in 0..1_000_000_i64,
            tail in "[a-z]{0,8}",
        ) {
            let request = EnrichedRequest {
                path: format!("/{}/{id}/{tail}", words.join("/")),
                ..Default::default()
            };
            prop_assert_eq!(request.id_from_path(), Some(id));
        }
    }
}
