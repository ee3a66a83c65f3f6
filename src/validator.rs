//! Request validation.
//!
//! Checks required headers first, then the JSON body against the endpoint's
//! declared schema. The first failing check short-circuits.

use crate::config::EndpointDefinition;
use axum::http::HeaderMap;
use jsonschema::JSONSchema;
use serde::Serialize;
use serde_json::Value;

/// Methods whose body is validated against `bodySchema`.
pub const BODY_METHODS: &[&str] = &["POST", "PUT", "PATCH"];

/// Why a request was not accepted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required headers: {}", .0.join(", "))]
    MissingHeaders(Vec<String>),

    #[error("request body failed schema validation ({} violations)", .0.len())]
    SchemaValidationFailed(Vec<SchemaViolation>),

    #[error("invalid body schema: {0}")]
    InvalidSchema(String),
}

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaViolation {
    /// JSON pointer into the request body
    pub path: String,
    /// JSON pointer into the schema
    pub schema_path: String,
    pub message: String,
}

/// Compile a JSON Schema document.
pub fn compile_schema(schema: &Value) -> Result<JSONSchema, String> {
    JSONSchema::compile(schema).map_err(|e| e.to_string())
}

/// Validate an inbound request against a matched endpoint.
pub fn validate_request(
    endpoint: &EndpointDefinition,
    method: &str,
    headers: &HeaderMap,
    body: &Value,
) -> Result<(), ValidationError> {
    let missing = missing_headers(&endpoint.required_headers, headers);
    if !missing.is_empty() {
        return Err(ValidationError::MissingHeaders(missing));
    }

    if let Some(schema) = &endpoint.body_schema {
        if carries_body(method) {
            validate_body(schema, body)?;
        }
    }

    Ok(())
}

/// Whether a method conventionally carries a request body.
pub fn carries_body(method: &str) -> bool {
    BODY_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
}

/// Required header names that are absent or empty, in declaration order.
fn missing_headers(required: &[String], headers: &HeaderMap) -> Vec<String> {
    required
        .iter()
        .filter(|name| {
            // Lookup is case-insensitive; an unparsable name is never present
            headers
                .get(name.as_str())
                .map(|value| value.as_bytes().is_empty())
                .unwrap_or(true)
        })
        .cloned()
        .collect()
}

fn validate_body(schema: &Value, body: &Value) -> Result<(), ValidationError> {
    let compiled = compile_schema(schema).map_err(ValidationError::InvalidSchema)?;

    let result = compiled.validate(body);
    if let Err(errors) = result {
        let violations = errors
            .map(|e| SchemaViolation {
                path: format_pointer(e.instance_path.to_string()),
                schema_path: format_pointer(e.schema_path.to_string()),
                message: e.to_string(),
            })
            .collect();
        return Err(ValidationError::SchemaValidationFailed(violations));
    }
    Ok(())
}

fn format_pointer(text: String) -> String {
    if text.is_empty() {
        "/".into()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn endpoint_with(required: &[&str], schema: Option<Value>) -> EndpointDefinition {
        let mut endpoint = EndpointDefinition::new("POST", "/users");
        endpoint.required_headers = required.iter().map(|h| h.to_string()).collect();
        endpoint.body_schema = schema;
        endpoint
    }

    fn name_schema() -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string" } }
        })
    }

    #[test]
    fn test_no_rules_accepts_anything() {
        let endpoint = endpoint_with(&[], None);
        assert!(validate_request(&endpoint, "POST", &HeaderMap::new(), &json!("x")).is_ok());
    }

    #[test]
    fn test_missing_header_rejected() {
        let endpoint = endpoint_with(&["x-token", "x-client"], None);
        let mut headers = HeaderMap::new();
        headers.insert("x-client", HeaderValue::from_static("web"));

        let err = validate_request(&endpoint, "POST", &headers, &json!({})).unwrap_err();
        assert_eq!(err, ValidationError::MissingHeaders(vec!["x-token".to_string()]));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let endpoint = endpoint_with(&["X-Token"], None);
        let mut headers = HeaderMap::new();
        headers.insert("x-token", HeaderValue::from_static("abc"));

        assert!(validate_request(&endpoint, "POST", &headers, &json!({})).is_ok());
    }

    #[test]
    fn test_empty_header_value_counts_as_missing() {
        let endpoint = endpoint_with(&["x-token"], None);
        let mut headers = HeaderMap::new();
        headers.insert("x-token", HeaderValue::from_static(""));

        assert!(matches!(
            validate_request(&endpoint, "POST", &headers, &json!({})),
            Err(ValidationError::MissingHeaders(_))
        ));
    }

    #[test]
    fn test_unparsable_header_name_counts_as_missing() {
        let endpoint = endpoint_with(&["bad header"], None);
        assert!(matches!(
            validate_request(&endpoint, "POST", &HeaderMap::new(), &json!({})),
            Err(ValidationError::MissingHeaders(_))
        ));
    }

    #[test]
    fn test_schema_violation_reports_field() {
        let endpoint = endpoint_with(&[], Some(name_schema()));

        let err = validate_request(&endpoint, "POST", &HeaderMap::new(), &json!({})).unwrap_err();
        match err {
            ValidationError::SchemaValidationFailed(violations) => {
                assert_eq!(violations.len(), 1);
                assert!(violations[0].message.contains("name"));
                assert_eq!(violations[0].path, "/");
                assert!(violations[0].schema_path.contains("required"));
            }
            other => panic!("expected schema failure, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_type_violation_points_at_field() {
        let endpoint = endpoint_with(&[], Some(name_schema()));

        let err = validate_request(&endpoint, "PUT", &HeaderMap::new(), &json!({ "name": 5 }))
            .unwrap_err();
        match err {
            ValidationError::SchemaValidationFailed(violations) => {
                assert_eq!(violations[0].path, "/name");
            }
            other => panic!("expected schema failure, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_body_accepted() {
        let endpoint = endpoint_with(&[], Some(name_schema()));
        let body = json!({ "name": "Ahmed" });
        assert!(validate_request(&endpoint, "PATCH", &HeaderMap::new(), &body).is_ok());
    }

    #[test]
    fn test_schema_skipped_for_bodyless_methods() {
        let endpoint = endpoint_with(&[], Some(name_schema()));
        assert!(validate_request(&endpoint, "GET", &HeaderMap::new(), &json!({})).is_ok());
        assert!(validate_request(&endpoint, "DELETE", &HeaderMap::new(), &json!({})).is_ok());
    }

    #[test]
    fn test_headers_checked_before_schema() {
        let endpoint = endpoint_with(&["x-token"], Some(name_schema()));

        let err = validate_request(&endpoint, "POST", &HeaderMap::new(), &json!({})).unwrap_err();
        assert!(matches!(err, ValidationError::MissingHeaders(_)));
    }

    #[test]
    fn test_invalid_schema_reported() {
        let endpoint = endpoint_with(&[], Some(json!({ "type": 12 })));
        assert!(matches!(
            validate_request(&endpoint, "POST", &HeaderMap::new(), &json!({})),
            Err(ValidationError::InvalidSchema(_))
        ));
    }
}
