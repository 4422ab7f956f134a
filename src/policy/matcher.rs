// src/policy/matcher.rs
//! Vendor/endpoint matching
//!
//! A vendor matches when its configured domain is a substring of the
//! request host. That vendor's endpoints are then evaluated in declaration
//! order against the value extracted for their match location; the first
//! regex hit wins.

use crate::policy::document::{EndpointConfig, MatchLocation, PolicyDocument, VendorConfig};
use serde_json::Value;
use url::Url;

/// Registrable-domain label of a host: the second-to-last DNS label, or the
/// whole host when it has fewer than two labels ("api.stripe.com" -> "stripe",
/// "localhost" -> "localhost").
///
/// Label splitting, not a public-suffix-list lookup: multi-label suffixes
/// yield the suffix label ("example.co.uk" -> "co"). `domain`-location
/// regexes targeting such hosts should match the full host via the `url`
/// location instead.
pub fn registrable_domain(host: &str) -> &str {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        labels[labels.len() - 2]
    } else {
        host
    }
}

/// Subdomain labels before the registrable domain ("api.eu.stripe.com" ->
/// "api.eu", "stripe.com" -> "").
pub fn subdomain(host: &str) -> &str {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return "";
    }
    let prefix_len = labels[..labels.len() - 2].join(".").len();
    &host[..prefix_len]
}

/// Extract the value an endpoint's regex is tested against
pub fn match_test_value(
    location: MatchLocation,
    url: &Url,
    request_body: Option<&Value>,
    request_headers: &Value,
) -> String {
    match location {
        MatchLocation::Path => url.path().to_string(),
        MatchLocation::Url => url.as_str().to_string(),
        MatchLocation::Domain => registrable_domain(url.host_str().unwrap_or_default()).to_string(),
        MatchLocation::Subdomain => subdomain(url.host_str().unwrap_or_default()).to_string(),
        MatchLocation::RequestHeaders => serde_json::to_string(request_headers).unwrap_or_default(),
        MatchLocation::RequestBody => match request_body {
            Some(body) => serde_json::to_string(body).unwrap_or_default(),
            None => String::new(),
        },
    }
}

/// Find the vendor and endpoint matching an outbound call, if any
pub fn match_vendor_endpoint<'a>(
    doc: &'a PolicyDocument,
    url: &Url,
    request_body: Option<&Value>,
    request_headers: &Value,
) -> Option<(&'a VendorConfig, &'a EndpointConfig)> {
    let host = url.host_str()?;
    let vendor = doc.vendors.iter().find(|v| host.contains(&v.domain))?;
    let endpoint = vendor.endpoints.iter().find(|endpoint| {
        let test_value = match_test_value(endpoint.location, url, request_body, request_headers);
        endpoint.regex.is_match(&test_value)
    })?;
    Some((vendor, endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::document::EndpointAction;
    use serde_json::json;

    fn policy(raw: Value) -> PolicyDocument {
        PolicyDocument::parse(&raw).unwrap()
    }

    #[test]
    fn test_domain_and_subdomain_extraction() {
        assert_eq!(registrable_domain("api.stripe.com"), "stripe");
        assert_eq!(registrable_domain("localhost"), "localhost");
        // Label-split heuristic, no public-suffix awareness.
        assert_eq!(registrable_domain("example.co.uk"), "co");
        assert_eq!(subdomain("api.stripe.com"), "api");
        assert_eq!(subdomain("api.eu.stripe.com"), "api.eu");
        assert_eq!(subdomain("stripe.com"), "");
        assert_eq!(subdomain("localhost"), "");
    }

    #[test]
    fn test_vendor_domain_is_substring_of_host() {
        let doc = policy(json!([
            {
                "domain": "stripe.com",
                "id": "stripe",
                "endpoints": [
                    { "id": "charges", "matchingRegex": { "location": "path", "regex": "charges" } }
                ]
            }
        ]));
        let url = Url::parse("https://api.stripe.com/v1/charges").unwrap();
        let (vendor, endpoint) =
            match_vendor_endpoint(&doc, &url, None, &json!({})).expect("should match");
        assert_eq!(vendor.vendor_id.as_deref(), Some("stripe"));
        assert_eq!(endpoint.endpoint_id.as_deref(), Some("charges"));
    }

    #[test]
    fn test_no_vendor_for_unknown_host() {
        let doc = policy(json!([
            {
                "domain": "stripe.com",
                "endpoints": [
                    { "matchingRegex": { "location": "path", "regex": ".*" } }
                ]
            }
        ]));
        let url = Url::parse("https://api.github.com/repos").unwrap();
        assert!(match_vendor_endpoint(&doc, &url, None, &json!({})).is_none());
    }

    #[test]
    fn test_first_match_wins_in_declaration_order() {
        let doc = policy(json!([
            {
                "domain": "example.com",
                "endpoints": [
                    {
                        "id": "first",
                        "matchingRegex": { "location": "path", "regex": "items" },
                        "endpointConfiguration": { "action": "Ignore", "sensitiveKeys": [] }
                    },
                    {
                        "id": "second",
                        "matchingRegex": { "location": "path", "regex": "items/42" }
                    }
                ]
            }
        ]));
        let url = Url::parse("https://example.com/items/42").unwrap();
        let (_, endpoint) = match_vendor_endpoint(&doc, &url, None, &json!({})).unwrap();
        assert_eq!(endpoint.endpoint_id.as_deref(), Some("first"));
        assert_eq!(endpoint.action, EndpointAction::Ignore);
    }

    #[test]
    fn test_request_body_location() {
        let doc = policy(json!([
            {
                "domain": "example.com",
                "endpoints": [
                    { "id": "by-body", "matchingRegex": { "location": "requestBody", "regex": "\"kind\":\"order\"" } }
                ]
            }
        ]));
        let url = Url::parse("https://example.com/submit").unwrap();
        let body = json!({"kind": "order"});
        assert!(match_vendor_endpoint(&doc, &url, Some(&body), &json!({})).is_some());
        assert!(match_vendor_endpoint(&doc, &url, None, &json!({})).is_none());
    }

    #[test]
    fn test_subdomain_location() {
        let doc = policy(json!([
            {
                "domain": "example.com",
                "endpoints": [
                    { "matchingRegex": { "location": "subdomain", "regex": "^internal$" } }
                ]
            }
        ]));
        let hit = Url::parse("https://internal.example.com/x").unwrap();
        let miss = Url::parse("https://api.example.com/x").unwrap();
        assert!(match_vendor_endpoint(&doc, &hit, None, &json!({})).is_some());
        assert!(match_vendor_endpoint(&doc, &miss, None, &json!({})).is_none());
    }
}
