pub mod auth;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod duplication;
pub mod errors;
pub mod handlers;
pub mod locks;
pub mod memory_store;
pub mod metrics_defs;
pub mod request;
pub mod store;
#[cfg(test)]
mod testutils;

use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use shared::admin_service::AdminService;
use shared::http::{boxed_response, run_http_service};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::auth::{Authorizer, HttpAuthorizer};
use crate::clock::SystemClock;
use crate::config::{Config, StoreConfig};
use crate::dispatcher::Dispatcher;
use crate::duplication::{DuplicationSink, spawn_forwarders};
use crate::errors::{GatewayError, Result};
use crate::handlers::Backend;
use crate::locks::WriteLocks;
use crate::memory_store::MemoryStore;
use crate::store::Store;

/// Serves storage requests on the main listener.
pub struct GatewayService {
    dispatcher: Dispatcher,
}

impl GatewayService {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<BoxBody<Bytes, GatewayError>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        Box::pin(async move { Ok(boxed_response(dispatcher.route(req).await)) })
    }
}

/// Builds the dispatcher from `config` and serves it until a listener fails.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let store: Arc<dyn Store> = match config.store {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
    };

    let authorizer = match &config.auth {
        Some(auth) => {
            let authorizer = HttpAuthorizer::new(auth)
                .map_err(|e| GatewayError::Startup(format!("permission client: {e}")))?;
            Some(Arc::new(authorizer) as Arc<dyn Authorizer>)
        }
        None => {
            tracing::warn!("no permission service configured, every request is allowed");
            None
        }
    };

    let duplication = match &config.duplication {
        Some(duplication) => {
            let (sink, receiver) = DuplicationSink::new(
                &duplication.method,
                duplication.queue_size,
                duplication.overflow,
            );
            spawn_forwarders(duplication, receiver)
                .map_err(|e| GatewayError::Startup(format!("duplication forwarders: {e}")))?;
            tracing::info!(
                target = %duplication.url,
                workers = duplication.workers,
                "duplication enabled"
            );
            Some(sink)
        }
        None => None,
    };

    let backend = Backend {
        store,
        clock: Arc::new(SystemClock::new()),
        locks: WriteLocks::new(config.serialize_writes),
    };
    let dispatcher = Dispatcher::new(backend, authorizer, duplication, config.max_body_size);
    let readiness = dispatcher.clone();

    let gateway_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        GatewayService::new(dispatcher),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::new(move || readiness.is_ready()),
    );

    tokio::try_join!(gateway_task, admin_task)?;
    Ok(())
}
