use adsync_core::Credentials;

use super::*;
use crate::storage::MemoryTokenStorage;

fn test_client(base_url: &str) -> ApiClient {
    let credentials = Credentials {
        client_id: "id".into(),
        client_secret: "secret".into(),
        redirect_uri: None,
    };
    let store = CredentialStore::new(
        "http://127.0.0.1:9/oauth/token",
        credentials,
        Box::new(MemoryTokenStorage::default()),
        5,
    )
    .expect("credential store construction should not fail");
    let settings = ClientSettings {
        base_url: base_url.to_owned(),
        ..ClientSettings::default()
    };
    ApiClient::new(Arc::new(store), settings).expect("client construction should not fail")
}

#[test]
fn resolve_url_prefixes_relative_paths() {
    let client = test_client("https://api.mercadolibre.com");
    let url = client.resolve_url("/users/me").unwrap();
    assert_eq!(url.as_str(), "https://api.mercadolibre.com/users/me");
}

#[test]
fn resolve_url_keeps_base_path_prefix() {
    let client = test_client("http://localhost:8080/proxy/");
    let url = client.resolve_url("/sites/MLB").unwrap();
    assert_eq!(url.as_str(), "http://localhost:8080/proxy/sites/MLB");
}

#[test]
fn resolve_url_passes_absolute_urls_through() {
    let client = test_client("https://api.mercadolibre.com");
    let url = client
        .resolve_url("https://other.example.com/x?y=1")
        .unwrap();
    assert_eq!(url.as_str(), "https://other.example.com/x?y=1");
}

#[test]
fn advertising_routes_get_version_two() {
    let client = test_client("https://api.mercadolibre.com");
    let url = client
        .resolve_url("/advertising/MLB/product_ads/campaigns")
        .unwrap();
    let (headers, caller_auth) = client.build_headers(&url, &[]).unwrap();
    assert_eq!(headers.get("Api-Version").unwrap(), "2");
    assert!(!caller_auth);
}

#[test]
fn other_routes_have_no_version_header() {
    let client = test_client("https://api.mercadolibre.com");
    let url = client.resolve_url("/orders/search").unwrap();
    let (headers, _) = client.build_headers(&url, &[]).unwrap();
    assert!(headers.get("Api-Version").is_none());
    assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
}

#[test]
fn caller_headers_override_defaults() {
    let client = test_client("https://api.mercadolibre.com");
    let url = client.resolve_url("/advertising/MLB/ads").unwrap();
    let overrides = vec![
        ("Api-Version".to_string(), "1".to_string()),
        ("Authorization".to_string(), "Bearer manual".to_string()),
    ];
    let (headers, caller_auth) = client.build_headers(&url, &overrides).unwrap();
    assert_eq!(headers.get("Api-Version").unwrap(), "1");
    assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer manual");
    assert!(caller_auth);
}

#[test]
fn invalid_header_name_is_rejected() {
    let client = test_client("https://api.mercadolibre.com");
    let url = client.resolve_url("/x").unwrap();
    let overrides = vec![("bad header".to_string(), "v".to_string())];
    let err = client.build_headers(&url, &overrides).unwrap_err();
    assert!(matches!(err, ClientError::InvalidHeader { .. }));
}
