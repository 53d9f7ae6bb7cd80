//! One logical API call and its decoded result.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A request to the marketplace API, before authentication is applied.
///
/// `path` is either relative to the client's base URL (`/users/me`) or an
/// absolute `http(s)://` URL. Query values may be any JSON scalar; they are
/// stringified on send, with `null` becoming an empty string.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, Value)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::None,
            timeout: None,
            max_retries: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn params<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.params
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Adds a header. Caller headers override the engine's defaults,
    /// including `Authorization` and `Api-Version`.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    #[must_use]
    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(pairs);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Query parameters as strings, in insertion order.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), stringify_param(v)))
            .collect()
    }
}

/// Renders a query value so it serializes the same way on every call.
#[must_use]
pub fn stringify_param(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// A successful response body: JSON when it decodes, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(Value),
    Text(String),
}

impl ApiResponse {
    pub(crate) fn from_body(body: String) -> Self {
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(body),
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stringify_covers_every_scalar() {
        assert_eq!(stringify_param(&Value::Null), "");
        assert_eq!(stringify_param(&json!("MLB")), "MLB");
        assert_eq!(stringify_param(&json!(true)), "true");
        assert_eq!(stringify_param(&json!(200)), "200");
        assert_eq!(stringify_param(&json!(1.5)), "1.5");
    }

    #[test]
    fn query_pairs_preserve_order() {
        let request = ApiRequest::get("/x")
            .param("limit", 50)
            .param("offset", 0)
            .param("status", Value::Null);
        assert_eq!(
            request.query_pairs(),
            vec![
                ("limit".to_string(), "50".to_string()),
                ("offset".to_string(), "0".to_string()),
                ("status".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn non_json_body_is_kept_as_text() {
        assert_eq!(
            ApiResponse::from_body("ok".into()),
            ApiResponse::Text("ok".into())
        );
        assert_eq!(
            ApiResponse::from_body(r#"{"a":1}"#.into()).into_json(),
            Some(json!({"a": 1}))
        );
    }
}
