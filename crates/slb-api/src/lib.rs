//! slb-api — HTTP ingress for the SLB dispatcher.
//!
//! Thin axum adapter: every route forwards to one [`DispatcherHandle`]
//! call. Unmatched routes are treated as selection requests, so clients can
//! hit the balancer with any path and be redirected to a backend with the
//! same path and query.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/select` | Select a server (JSON body optional) |
//! | POST | `/api/v1/server/state` | Health report for one backend |
//! | POST | `/api/v1/user/policy` | Upsert a sticky user policy |
//! | POST | `/api/v1/server/config` | Replace the backend list |
//! | GET | `/api/v1/status` | Registry, policies, and queue depths |
//! | any | fallback | Select a server, fields from an optional JSON body |

pub mod executor;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use slb_scheduler::DispatcherHandle;

pub use executor::{ExecuteFuture, WorkExecutor};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: DispatcherHandle,
    /// Runs `doWork` requests. Without one they are answered with 501.
    pub executor: Option<Arc<dyn WorkExecutor>>,
}

impl ApiState {
    pub fn new(dispatcher: DispatcherHandle) -> Self {
        Self {
            dispatcher,
            executor: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn WorkExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }
}

/// Build the complete ingress router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/select", post(handlers::select))
        .route("/server/state", post(handlers::update_server_state))
        .route("/user/policy", post(handlers::update_user_policy))
        .route("/server/config", post(handlers::update_config))
        .route("/status", get(handlers::status))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .fallback(handlers::fallback)
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}
