//! Request dispatch: decode, authorize, handle, duplicate, respond.
//!
//! Every request gets a response. Authorization denials are answered with the
//! bare denial reason; every other failure (malformed body, store failure,
//! unreachable permission service, unknown path) with a JSON error body
//! `{"Status":"Error","Error":"<kind>","Message":"..."}`.

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode};
use shared::http::{json_response, make_error_response, text_response};
use shared::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::{Authorizer, RequestContext};
use crate::duplication::DuplicationSink;
use crate::errors::{AuthError, DecodeError, ErrorBody, GatewayError};
use crate::handlers::{Backend, Reply, handler_for};
use crate::metrics_defs::{AUTH_DENIED, REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::request::{Operation, StorageRequest};

struct DispatcherInner {
    backend: Backend,
    authorizer: Option<Arc<dyn Authorizer>>,
    duplication: Option<DuplicationSink>,
    max_body_size: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        backend: Backend,
        authorizer: Option<Arc<dyn Authorizer>>,
        duplication: Option<DuplicationSink>,
        max_body_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                backend,
                authorizer,
                duplication,
                max_body_size,
            }),
        }
    }

    /// Ready unless duplication is enabled and its queue has no consumer left.
    pub fn is_ready(&self) -> bool {
        self.inner
            .duplication
            .as_ref()
            .map(DuplicationSink::is_open)
            .unwrap_or(true)
    }

    /// Maps an HTTP request onto an operation and answers it.
    pub async fn route<B>(&self, req: Request<B>) -> Response<Bytes>
    where
        B: Body + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = req.uri().path();
        let Some(operation) = Operation::from_path(path) else {
            tracing::warn!(method = %req.method(), path, "No operation matched");
            return error_response(&GatewayError::UnknownOperation(path.to_string()));
        };

        if req.method() != Method::POST {
            return error_response(&GatewayError::MethodNotAllowed(req.method().to_string()));
        }

        let started = Instant::now();
        let context = RequestContext::from_headers(req.headers());

        let inflight = InflightGuard::new();
        let outcome = match read_body(req.into_body(), self.inner.max_body_size).await {
            Ok(body) => {
                // Once the body is in, the operation and its duplication run to
                // completion even if the caller goes away.
                let dispatcher = self.clone();
                let task = tokio::spawn(async move {
                    let _inflight = inflight;
                    dispatcher.process(operation, &context, &body).await
                });
                task.await
                    .unwrap_or_else(|e| Err(GatewayError::Internal(e.to_string())))
            }
            Err(err) => Err(err.into()),
        };

        let response = match outcome {
            Ok(reply) => json_response(StatusCode::OK, reply.to_json().to_string()),
            Err(err) => {
                log_failure(operation, &err);
                error_response(&err)
            }
        };

        histogram!(
            REQUEST_DURATION,
            "operation" => operation.as_str(),
            "status" => response.status().as_u16().to_string()
        )
        .record(started.elapsed().as_secs_f64());

        response
    }

    /// Runs one operation on an already buffered body.
    ///
    /// The permission gate runs before the handler touches the store or stamps
    /// any system field. Duplication only happens once the handler succeeded.
    pub async fn process(
        &self,
        operation: Operation,
        context: &RequestContext,
        body: &[u8],
    ) -> Result<Reply, GatewayError> {
        let mut request = StorageRequest::decode(operation, body)?;

        if let Some(authorizer) = &self.inner.authorizer
            && let Err(err) = authorizer
                .check_permission(context, &request.collection, operation, &request.select)
                .await
        {
            if let AuthError::Denied(_) = err {
                counter!(AUTH_DENIED, "operation" => operation.as_str()).increment(1);
            }
            return Err(err.into());
        }

        let reply = handler_for(operation)
            .handle(&self.inner.backend, &mut request)
            .await?;

        if let Some(sink) = &self.inner.duplication {
            sink.duplicate(operation, request);
        }

        Ok(reply)
    }
}

/// Counts a request in `requests.inflight` until dropped.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        Self
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, DecodeError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Limited::new(body, limit)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|err| match err.downcast_ref::<LengthLimitError>() {
            Some(_) => DecodeError::BodyTooLarge(limit),
            None => DecodeError::BodyRead(err.to_string()),
        })
}

fn log_failure(operation: Operation, err: &GatewayError) {
    match err {
        GatewayError::Denied(reason) => {
            tracing::info!(%operation, reason, "request denied")
        }
        GatewayError::Decode(_) => {
            tracing::info!(%operation, error = %err, "rejected malformed request")
        }
        _ => tracing::error!(%operation, error = %err, "request failed"),
    }
}

fn error_response(err: &GatewayError) -> Response<Bytes> {
    if let GatewayError::Denied(reason) = err {
        return text_response(StatusCode::FORBIDDEN, reason.clone());
    }

    let message = err.to_string();
    let body = ErrorBody {
        status: "Error",
        error: err.kind(),
        message: &message,
    };
    match serde_json::to_vec(&body) {
        Ok(bytes) => json_response(err.status_code(), bytes),
        Err(_) => make_error_response(err.status_code()),
    }
}
