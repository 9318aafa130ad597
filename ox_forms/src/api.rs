//! Boundary to the external API layer: request templating, option list
//! normalisation and the [`ApiClient`] seam.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use log::{debug, warn};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::conditions::is_truthy;
use crate::error::ApiError;
use crate::expr::display_value;
use crate::path;
use crate::traits::OptionItem;

const VALID_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX.get_or_init(|| Regex::new(r"\{\{(\w+(?:\.\w+)*)\}\}").expect("valid static regex"))
}

/// Request description as written in the configuration (`options.api`,
/// `action.api`).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiSpec {
    pub fn get(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }
}

/// A request with every placeholder substituted, ready to send.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Substitutes `{{dotted.path}}` placeholders in a string. Placeholders that
/// do not resolve are left as written.
pub fn resolve_string(template: &str, values: &Value) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures| match path::get(values, &caps[1]) {
            Some(value) => display_value(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Applies [`resolve_string`] to every string inside `template`.
pub fn resolve_template(template: &Value, values: &Value) -> Value {
    match template {
        Value::String(s) => Value::String(resolve_string(s, values)),
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve_template(item, values)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), resolve_template(value, values)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn validate_api_spec(spec: &ApiSpec) -> Result<(), ApiError> {
    if spec.url.trim().is_empty() {
        return Err(ApiError::InvalidSpec("url is required".to_string()));
    }
    if let Some(method) = &spec.method {
        if !VALID_METHODS.contains(&method.to_uppercase().as_str()) {
            return Err(ApiError::InvalidSpec(format!("unsupported method '{method}'")));
        }
    }
    Ok(())
}

fn build_request(spec: &ApiSpec, values: &Value, default_method: &str, data: Option<Value>) -> Result<ApiRequest, ApiError> {
    validate_api_spec(spec)?;
    Ok(ApiRequest {
        url: resolve_string(&spec.url, values),
        method: spec
            .method
            .as_deref()
            .unwrap_or(default_method)
            .to_uppercase(),
        params: spec.params.as_ref().map(|p| resolve_template(p, values)),
        headers: spec.headers.clone(),
        data,
    })
}

/// Option-list request: `GET` unless `method` says otherwise.
pub fn options_request(spec: &ApiSpec, values: &Value) -> Result<ApiRequest, ApiError> {
    build_request(spec, values, "GET", None)
}

/// Action request: `POST` unless `method` says otherwise; the body is the
/// templated `data`, or the whole value tree when no `data` is configured.
pub fn action_request(spec: &ApiSpec, values: &Value) -> Result<ApiRequest, ApiError> {
    let data = resolve_template(spec.data.as_ref().unwrap_or(values), values);
    build_request(spec, values, "POST", Some(data))
}

fn first_truthy<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| item.get(*key))
        .find(|v| is_truthy(Some(*v)))
}

fn normalize_item(item: &Value, value_key: &str, label_key: &str) -> OptionItem {
    let label = path::get(item, label_key)
        .or_else(|| first_truthy(item, &[label_key, "label", "name"]))
        .map(display_value)
        .unwrap_or_else(|| display_value(item));
    let value = path::get(item, value_key)
        .or_else(|| first_truthy(item, &[value_key, "value", "id"]))
        .unwrap_or(item)
        .clone();
    OptionItem { label, value }
}

/// Turns an option-list response into `{label, value}` items. Accepts a bare
/// array or an object carrying the array under `data` or `options`.
pub fn normalize_options(response: &Value, value_key: Option<&str>, label_key: Option<&str>) -> Vec<OptionItem> {
    let value_key = value_key.unwrap_or("value");
    let label_key = label_key.unwrap_or("label");

    let items = response
        .as_array()
        .or_else(|| response.get("data").and_then(Value::as_array))
        .or_else(|| response.get("options").and_then(Value::as_array));

    match items {
        Some(items) => items
            .iter()
            .map(|item| normalize_item(item, value_key, label_key))
            .collect(),
        None => {
            warn!("Unexpected option list response format: {}", response);
            Vec::new()
        }
    }
}

/// Transport used to reach the API layer. Only [`ApiClient::send`] has to
/// be provided.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<Value, ApiError>;

    async fn load_options(&self, spec: &ApiSpec, values: &Value) -> Result<Vec<OptionItem>, ApiError> {
        let request = options_request(spec, values)?;
        let response = self.send(request).await?;
        Ok(normalize_options(
            &response,
            spec.value_key.as_deref(),
            spec.label_key.as_deref(),
        ))
    }

    async fn execute_action(&self, spec: &ApiSpec, values: &Value) -> Result<Value, ApiError> {
        let request = action_request(spec, values)?;
        self.send(request).await
    }
}

/// In-memory client answering from canned, URL-keyed responses.
///
/// `GET` requests receive the stored response; other methods receive a
/// generic success acknowledgement. Unknown URLs answer with status 404.
#[derive(Debug, Default)]
pub struct MockApiClient {
    responses: HashMap<String, Value>,
    failures: HashMap<String, String>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client preloaded with the sample reference data used by demo forms.
    pub fn with_sample_data() -> Self {
        let mut client = Self::new();
        client.add_response(
            "/api/countries",
            json!([
                {"code": "US", "name": "United States"},
                {"code": "CA", "name": "Canada"},
                {"code": "UK", "name": "United Kingdom"},
                {"code": "AU", "name": "Australia"},
                {"code": "DE", "name": "Germany"},
                {"code": "FR", "name": "France"},
                {"code": "JP", "name": "Japan"},
                {"code": "IN", "name": "India"}
            ]),
        );
        client.add_response(
            "/api/states",
            json!([
                {"code": "CA", "name": "California"},
                {"code": "NY", "name": "New York"},
                {"code": "TX", "name": "Texas"},
                {"code": "FL", "name": "Florida"}
            ]),
        );
        client.add_response(
            "/api/cities",
            json!([
                {"code": "SF", "name": "San Francisco"},
                {"code": "LA", "name": "Los Angeles"},
                {"code": "NYC", "name": "New York City"},
                {"code": "CHI", "name": "Chicago"}
            ]),
        );
        client.add_response(
            "/api/drafts",
            json!({"success": true, "message": "Draft saved successfully", "id": "draft_123"}),
        );
        client
    }

    pub fn add_response(&mut self, url: &str, data: Value) {
        self.failures.remove(url);
        self.responses.insert(url.to_string(), data);
    }

    pub fn add_failure(&mut self, url: &str, message: &str) {
        self.responses.remove(url);
        self.failures.insert(url.to_string(), message.to_string());
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ApiClient for MockApiClient {
    async fn send(&self, request: ApiRequest) -> Result<Value, ApiError> {
        debug!("Mock {} {}", request.method, request.url);
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }

        if let Some(message) = self.failures.get(&request.url) {
            return Err(ApiError::Transport {
                url: request.url,
                message: message.clone(),
            });
        }

        match self.responses.get(&request.url) {
            Some(data) if request.method == "GET" => Ok(data.clone()),
            Some(_) => Ok(json!({"success": true, "message": "Action completed successfully (mock)"})),
            None => Err(ApiError::Status {
                url: request.url,
                status: 404,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_regex_builds() {
        let caps = placeholder_regex().captures("/api/{{user.id}}").unwrap();
        assert_eq!(&caps[1], "user.id");
    }

    #[test]
    fn templates_substitute_known_paths() {
        let values = json!({"user": {"id": 7, "country": "US"}, "flag": null});
        assert_eq!(
            resolve_string("/api/users/{{user.id}}/states?c={{user.country}}", &values),
            "/api/users/7/states?c=US"
        );
        assert_eq!(resolve_string("{{missing.path}}-{{flag}}", &values), "{{missing.path}}-null");
        assert_eq!(
            resolve_template(&json!({"q": ["{{user.country}}", 3]}), &values),
            json!({"q": ["US", 3]})
        );
    }

    #[test]
    fn spec_validation() {
        assert!(validate_api_spec(&ApiSpec::get("/api/x")).is_ok());
        assert!(matches!(validate_api_spec(&ApiSpec::default()), Err(ApiError::InvalidSpec(_))));
        let spec = ApiSpec {
            method: Some("fetch".into()),
            ..ApiSpec::get("/api/x")
        };
        assert!(validate_api_spec(&spec).is_err());
        let spec = ApiSpec {
            method: Some("patch".into()),
            ..ApiSpec::get("/api/x")
        };
        assert!(validate_api_spec(&spec).is_ok());
    }

    #[test]
    fn action_body_defaults_to_values() {
        let values = json!({"name": "Ada"});
        let request = action_request(&ApiSpec::get("/api/save"), &values).unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.data, Some(values.clone()));

        let spec = ApiSpec {
            data: Some(json!({"who": "{{name}}"})),
            ..ApiSpec::get("/api/save")
        };
        assert_eq!(action_request(&spec, &values).unwrap().data, Some(json!({"who": "Ada"})));
    }

    #[test]
    fn normalizes_response_shapes() {
        let bare = json!([{"label": "A", "value": 1}, "plain"]);
        let options = normalize_options(&bare, None, None);
        assert_eq!(options[0], OptionItem { label: "A".into(), value: json!(1) });
        assert_eq!(options[1], OptionItem { label: "plain".into(), value: json!("plain") });

        let wrapped = json!({"data": [{"name": "Canada", "id": "CA"}]});
        let options = normalize_options(&wrapped, None, None);
        assert_eq!(options[0], OptionItem { label: "Canada".into(), value: json!("CA") });

        let keyed = json!({"options": [{"code": "US", "name": "United States"}]});
        let options = normalize_options(&keyed, Some("code"), Some("name"));
        assert_eq!(options[0], OptionItem { label: "United States".into(), value: json!("US") });

        assert!(normalize_options(&json!({"rows": []}), None, None).is_empty());
    }

    #[tokio::test]
    async fn mock_client_serves_options_and_actions() {
        let client = MockApiClient::with_sample_data();
        let spec = ApiSpec {
            value_key: Some("code".into()),
            label_key: Some("name".into()),
            ..ApiSpec::get("/api/{{kind}}")
        };
        let options = client.load_options(&spec, &json!({"kind": "states"})).await.unwrap();
        assert_eq!(options.len(), 4);
        assert_eq!(options[0].value, json!("CA"));

        let ack = client.execute_action(&ApiSpec::get("/api/drafts"), &json!({})).await.unwrap();
        assert_eq!(ack["success"], json!(true));

        let missing = client.load_options(&ApiSpec::get("/api/nope"), &json!({})).await;
        assert!(matches!(missing, Err(ApiError::Status { status: 404, .. })));

        let requests = client.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].url, "/api/states");
        assert_eq!(requests[1].method, "POST");
    }

    #[tokio::test]
    async fn mock_client_failures() {
        let mut client = MockApiClient::new();
        client.add_failure("/api/boom", "connection reset");
        let err = client.execute_action(&ApiSpec::get("/api/boom"), &json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "request to '/api/boom' failed: connection reset");
    }
}
