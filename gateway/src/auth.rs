//! Permission checks against an external permission service.

use async_trait::async_trait;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::config::AuthConfig;
use crate::errors::AuthError;
use crate::request::{Document, Operation};

const TOKEN_HEADER: &str = "token";
const DEFAULT_DENIAL: &str = "permission denied";

/// Caller identity, taken from the transport request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestContext {
    pub token: Option<String>,
}

impl RequestContext {
    /// Reads the caller token from the `Token` header, falling back to
    /// `Authorization: Bearer <token>`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let token = headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            })
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        Self { token }
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Returns `Ok(())` when the caller may run `operation` on `collection`
    /// restricted to `select`.
    async fn check_permission(
        &self,
        context: &RequestContext,
        collection: &str,
        operation: Operation,
        select: &Document,
    ) -> Result<(), AuthError>;
}

#[derive(Serialize)]
struct PermissionRequest<'a> {
    token: Option<&'a str>,
    collection: &'a str,
    method: Operation,
    select: &'a Document,
}

#[derive(Deserialize)]
struct PermissionResponse {
    allowed: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Asks a permission service over HTTP.
///
/// The service receives `{"token", "collection", "method", "select"}` and
/// answers `{"allowed": bool, "reason": "..."}`. A 401 or 403 status is a
/// denial whose body is the reason; any other failure means the service is
/// unavailable.
pub struct HttpAuthorizer {
    client: reqwest::Client,
    url: Url,
}

impl HttpAuthorizer {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AuthError::Unavailable(format!("failed to build client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl Authorizer for HttpAuthorizer {
    async fn check_permission(
        &self,
        context: &RequestContext,
        collection: &str,
        operation: Operation,
        select: &Document,
    ) -> Result<(), AuthError> {
        let request = PermissionRequest {
            token: context.token.as_deref(),
            collection,
            method: operation,
            select,
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            let reason = response.text().await.unwrap_or_default();
            return Err(denial(Some(reason)));
        }
        if !status.is_success() {
            return Err(AuthError::Unavailable(format!(
                "permission service answered {status}"
            )));
        }

        let verdict: PermissionResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(format!("malformed permission response: {e}")))?;

        if !verdict.allowed {
            return Err(denial(verdict.reason));
        }
        Ok(())
    }
}

fn denial(reason: Option<String>) -> AuthError {
    let reason = reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_DENIAL.to_string());
    AuthError::Denied(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::spawn_test_server;
    use hyper::header::HeaderValue;
    use hyper::{Response, StatusCode};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn authorizer(port: u16) -> HttpAuthorizer {
        HttpAuthorizer::new(&AuthConfig {
            url: Url::parse(&format!("http://127.0.0.1:{port}/check")).unwrap(),
            timeout_secs: 2,
        })
        .unwrap()
    }

    fn select() -> Document {
        json!({"owner": "me"}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_context_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(RequestContext::from_headers(&headers).token, None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(
            RequestContext::from_headers(&headers).token.as_deref(),
            Some("abc")
        );

        headers.insert("token", HeaderValue::from_static("xyz"));
        assert_eq!(
            RequestContext::from_headers(&headers).token.as_deref(),
            Some("xyz")
        );
    }

    #[tokio::test]
    async fn test_permission_service_allows_and_denies() {
        let port = spawn_test_server(|body| {
            let request: Value = serde_json::from_slice(&body).unwrap();
            let verdict = match request["token"].as_str() {
                Some("admin") => json!({"allowed": true}),
                _ => json!({"allowed": false, "reason": format!("no access to {}", request["collection"].as_str().unwrap())}),
            };
            assert_eq!(request["method"], json!("remove"));
            assert_eq!(request["select"], json!({"owner": "me"}));
            Response::new(verdict.to_string().into())
        })
        .await;
        let authorizer = authorizer(port);

        let admin = RequestContext {
            token: Some("admin".into()),
        };
        assert_eq!(
            authorizer
                .check_permission(&admin, "users", Operation::Remove, &select())
                .await,
            Ok(())
        );

        assert_eq!(
            authorizer
                .check_permission(&RequestContext::default(), "users", Operation::Remove, &select())
                .await,
            Err(AuthError::Denied("no access to users".into()))
        );
    }

    #[tokio::test]
    async fn test_forbidden_status_is_a_denial() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let port = spawn_test_server(move |_| {
            let status = match counter.fetch_add(1, Ordering::SeqCst) {
                0 => StatusCode::FORBIDDEN,
                1 => StatusCode::UNAUTHORIZED,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = if status == StatusCode::FORBIDDEN { "token expired" } else { "" };
            let mut response = Response::new(body.into());
            *response.status_mut() = status;
            response
        })
        .await;
        let authorizer = authorizer(port);
        let context = RequestContext::default();

        assert_eq!(
            authorizer
                .check_permission(&context, "users", Operation::Read, &Document::new())
                .await,
            Err(AuthError::Denied("token expired".into()))
        );
        assert_eq!(
            authorizer
                .check_permission(&context, "users", Operation::Read, &Document::new())
                .await,
            Err(AuthError::Denied(DEFAULT_DENIAL.into()))
        );
        assert!(matches!(
            authorizer
                .check_permission(&context, "users", Operation::Read, &Document::new())
                .await,
            Err(AuthError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let authorizer = HttpAuthorizer::new(&AuthConfig {
            url: Url::parse("http://127.0.0.1:9/check").unwrap(),
            timeout_secs: 1,
        })
        .unwrap();

        assert!(matches!(
            authorizer
                .check_permission(
                    &RequestContext::default(),
                    "users",
                    Operation::Read,
                    &Document::new()
                )
                .await,
            Err(AuthError::Unavailable(_))
        ));
    }
}
