use adsync_client::{ApiClient, ApiRequest, ApiResponse};
use anyhow::Context;
use reqwest::Method;

/// Send one request through the resilient engine and print the body.
///
/// JSON responses are pretty-printed; anything else is printed verbatim.
///
/// # Errors
///
/// Returns an error for an unknown method, a body that is not valid JSON, or
/// any failure surfaced by the engine.
pub(crate) async fn run_call(
    client: &ApiClient,
    method: &str,
    path: &str,
    params: &[(String, String)],
    headers: &[(String, String)],
    json: Option<&str>,
) -> anyhow::Result<()> {
    let request = build_request(method, path, params, headers, json)?;
    match client.call(request).await? {
        ApiResponse::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        ApiResponse::Text(text) => println!("{text}"),
    }
    Ok(())
}

fn build_request(
    method: &str,
    path: &str,
    params: &[(String, String)],
    headers: &[(String, String)],
    json: Option<&str>,
) -> anyhow::Result<ApiRequest> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method `{method}`"))?;
    let mut request = ApiRequest::new(method, path).params(
        params
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone()))),
    );
    for (name, value) in headers {
        request = request.header(name.clone(), value.clone());
    }
    if let Some(body) = json {
        let body: serde_json::Value =
            serde_json::from_str(body).context("--json is not valid JSON")?;
        request = request.json(body);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use adsync_client::request::RequestBody;

    use super::*;

    #[test]
    fn method_is_case_insensitive() {
        let request = build_request("post", "/x", &[], &[], None).unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body, RequestBody::None);
    }

    #[test]
    fn params_headers_and_body_are_applied() {
        let request = build_request(
            "GET",
            "/advertising/MLB/product_ads/campaigns",
            &[("limit".into(), "10".into())],
            &[("Api-Version".into(), "1".into())],
            Some(r#"{"a": 1}"#),
        )
        .unwrap();
        assert_eq!(request.query_pairs(), vec![("limit".to_string(), "10".to_string())]);
        assert_eq!(request.headers, vec![("Api-Version".to_string(), "1".to_string())]);
        assert_eq!(request.body, RequestBody::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn malformed_json_body_is_rejected() {
        assert!(build_request("POST", "/x", &[], &[], Some("{nope")).is_err());
    }
}
