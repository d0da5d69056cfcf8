use chrono::Utc;
use futures::future::BoxFuture;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::RequestResult;
use crate::scenario::{EndpointDefinition, ValidationRules};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").unwrap());

// ============================================================================
// Transport abstraction
// ============================================================================

/// Fully-resolved request handed to a transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl TransportResponse {
    pub fn has_header(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.headers.iter().any(|(k, _)| *k == name)
    }
}

/// Timeout, connection refused, DNS failure and the like.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Generic request/response boundary to the system under test.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: OutboundRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>>;
}

/// HTTP transport backed by a shared reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: OutboundRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
                .map_err(|e| TransportError(format!("invalid method {}: {}", request.method, e)))?;

            let mut builder = self
                .client
                .request(method, &request.url)
                .timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError(format!("timeout after {}ms", request.timeout.as_millis()))
                } else {
                    TransportError(e.to_string())
                }
            })?;

            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_lowercase(),
                        v.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect();
            let body = resp
                .bytes()
                .await
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .map_err(|e| TransportError(format!("failed to read body: {}", e)))?;

            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        })
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Issues single requests and normalizes them into `RequestResult`s.
/// Holds only run-scoped, read-only context.
#[derive(Clone)]
pub struct RequestExecutor {
    base: String,
    variables: Arc<BTreeMap<String, String>>,
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
}

impl RequestExecutor {
    pub fn new(
        base: &str,
        variables: BTreeMap<String, String>,
        transport: Arc<dyn Transport>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            variables: Arc::new(variables),
            transport,
            default_timeout,
        }
    }

    pub fn build_request(&self, endpoint: &EndpointDefinition) -> OutboundRequest {
        let path = self.substitute(&endpoint.path);
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path
        } else if path.starts_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        };

        OutboundRequest {
            method: endpoint.method.to_uppercase(),
            url,
            headers: endpoint
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), self.substitute(v)))
                .collect(),
            body: endpoint.body.as_deref().map(|b| self.substitute(b)),
            timeout: endpoint
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.default_timeout),
        }
    }

    /// Execute one request. Never fails: transport errors become a failed result.
    pub async fn execute(
        &self,
        endpoint: &EndpointDefinition,
        user_id: usize,
        run_start: Instant,
    ) -> RequestResult {
        let request = self.build_request(endpoint);
        let started = Instant::now();
        let outcome = self.transport.send(request).await;
        let finished = Instant::now();
        let latency_ms = finished.duration_since(started).as_secs_f64() * 1000.0;

        let (success, status_code, payload_bytes, error) = match outcome {
            Ok(resp) => {
                let verdict = validate_response(&endpoint.validation, &resp, latency_ms);
                (
                    verdict.is_ok(),
                    resp.status,
                    resp.body.len() as u64,
                    verdict.err(),
                )
            }
            Err(e) => {
                debug!("Transport failure on {}: {}", endpoint.path, e);
                (false, 0, 0, Some(e.to_string()))
            }
        };

        RequestResult {
            success,
            status_code,
            latency_ms,
            payload_bytes,
            error,
            timestamp: Utc::now(),
            offset_ms: finished.duration_since(run_start).as_millis() as u64,
            user_id,
            endpoint: endpoint.label(),
            path: endpoint.path.clone(),
        }
    }

    fn substitute(&self, input: &str) -> String {
        substitute_variables(input, &self.variables)
    }
}

/// Replace `{{name}}` placeholders; unknown names are left untouched.
pub fn substitute_variables(input: &str, variables: &BTreeMap<String, String>) -> String {
    if !input.contains("{{") {
        return input.to_string();
    }
    PLACEHOLDER
        .replace_all(input, |caps: &regex::Captures| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Classify a response. Rules are checked in order: status allow-list,
/// latency ceiling, body substrings, required headers, then the default
/// 2xx/3xx check when no allow-list is configured.
pub fn validate_response(
    rules: &ValidationRules,
    resp: &TransportResponse,
    latency_ms: f64,
) -> Result<(), String> {
    if let Some(allowed) = &rules.status_codes {
        if !allowed.contains(&resp.status) {
            return Err(format!("unexpected status {}", resp.status));
        }
    }

    if let Some(ceiling) = rules.max_response_time_ms {
        if latency_ms > ceiling {
            return Err(format!(
                "response time {:.0}ms exceeded {:.0}ms",
                latency_ms, ceiling
            ));
        }
    }

    for needle in &rules.body_contains {
        if !resp.body.contains(needle.as_str()) {
            return Err(format!("body missing '{}'", needle));
        }
    }

    for header in &rules.required_headers {
        if !resp.has_header(header) {
            return Err(format!("missing header '{}'", header));
        }
    }

    if rules.status_codes.is_none() && !(200..400).contains(&resp.status) {
        return Err(format!("HTTP {}", resp.status));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<TransportResponse, TransportError>);

    impl Transport for Canned {
        fn send(&self, _request: OutboundRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
            let out = self.0.clone();
            Box::pin(async move { out })
        }
    }

    fn endpoint(path: &str) -> EndpointDefinition {
        serde_json::from_value(serde_json::json!({ "path": path })).unwrap()
    }

    fn response(status: u16, body: &str) -> TransportResponse {
        TransportResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        }
    }

    #[test]
    fn test_default_rule_accepts_2xx_and_3xx() {
        let rules = ValidationRules::default();
        assert!(validate_response(&rules, &response(200, ""), 1.0).is_ok());
        assert!(validate_response(&rules, &response(302, ""), 1.0).is_ok());
        assert_eq!(
            validate_response(&rules, &response(404, ""), 1.0),
            Err("HTTP 404".to_string())
        );
    }

    #[test]
    fn test_status_allow_list_overrides_default() {
        let rules = ValidationRules {
            status_codes: Some(vec![404]),
            ..Default::default()
        };
        assert!(validate_response(&rules, &response(404, ""), 1.0).is_ok());
        assert!(validate_response(&rules, &response(200, ""), 1.0).is_err());
    }

    #[test]
    fn test_rules_checked_in_priority_order() {
        let rules = ValidationRules {
            status_codes: Some(vec![200]),
            max_response_time_ms: Some(100.0),
            body_contains: vec!["ok".to_string()],
            required_headers: vec!["x-request-id".to_string()],
        };
        let err = validate_response(&rules, &response(500, ""), 500.0).unwrap_err();
        assert!(err.contains("status"));
        let err = validate_response(&rules, &response(200, ""), 500.0).unwrap_err();
        assert!(err.contains("response time"));
        let err = validate_response(&rules, &response(200, "nope"), 5.0).unwrap_err();
        assert!(err.contains("body"));
        let err = validate_response(&rules, &response(200, "ok"), 5.0).unwrap_err();
        assert!(err.contains("x-request-id"));
    }

    #[test]
    fn test_header_check_is_case_insensitive() {
        let rules = ValidationRules {
            required_headers: vec!["Content-Type".to_string()],
            ..Default::default()
        };
        assert!(validate_response(&rules, &response(200, ""), 1.0).is_ok());
    }

    #[test]
    fn test_substitute_variables() {
        let mut vars = BTreeMap::new();
        vars.insert("user".to_string(), "42".to_string());
        assert_eq!(substitute_variables("/users/{{user}}", &vars), "/users/42");
        assert_eq!(substitute_variables("/users/{{ user }}/x", &vars), "/users/42/x");
        assert_eq!(substitute_variables("/x/{{missing}}", &vars), "/x/{{missing}}");
    }

    #[test]
    fn test_build_request_joins_base_and_path() {
        let exec = RequestExecutor::new(
            "http://localhost:8000/",
            BTreeMap::new(),
            Arc::new(Canned(Ok(response(200, "")))),
            Duration::from_secs(5),
        );
        let req = exec.build_request(&endpoint("/health"));
        assert_eq!(req.url, "http://localhost:8000/health");
        assert_eq!(req.method, "GET");
        assert_eq!(req.timeout, Duration::from_secs(5));
        let req = exec.build_request(&endpoint("status"));
        assert_eq!(req.url, "http://localhost:8000/status");
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_failed_result() {
        let exec = RequestExecutor::new(
            "http://localhost:8000",
            BTreeMap::new(),
            Arc::new(Canned(Err(TransportError("connection refused".to_string())))),
            Duration::from_secs(5),
        );
        let result = exec.execute(&endpoint("/x"), 3, Instant::now()).await;
        assert!(!result.success);
        assert_eq!(result.status_code, 0);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
        assert_eq!(result.user_id, 3);
        assert_eq!(result.path, "/x");
    }

    #[tokio::test]
    async fn test_successful_request_records_payload() {
        let exec = RequestExecutor::new(
            "http://localhost:8000",
            BTreeMap::new(),
            Arc::new(Canned(Ok(response(200, "hello")))),
            Duration::from_secs(5),
        );
        let result = exec.execute(&endpoint("/x"), 0, Instant::now()).await;
        assert!(result.success);
        assert_eq!(result.status_code, 200);
        assert_eq!(result.payload_bytes, 5);
        assert!(result.error.is_none());
    }
}
