//! HTTP trigger surface — a single endpoint that runs one poll cycle.
//!
//! `POST /run` takes no payload, executes a full cycle, and returns the
//! run summary as JSON. Unrecoverable infrastructure errors (mailbox or
//! ledger unreachable) surface as a non-2xx response so the external
//! scheduler knows the run must be retried.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::Mutex;
use tracing::error;

use crate::pipeline::poller::MailboxPoller;
use crate::pipeline::types::RunSummary;

/// Shared trigger state.
#[derive(Clone)]
pub struct TriggerState {
    poller: Arc<MailboxPoller>,
    /// Overlapping triggers on this process run one at a time.
    run_lock: Arc<Mutex<()>>,
    run_timeout: Duration,
}

/// Build the trigger router.
pub fn trigger_routes(poller: Arc<MailboxPoller>, run_timeout: Duration) -> Router {
    let state = TriggerState {
        poller,
        run_lock: Arc::new(Mutex::new(())),
        run_timeout,
    };
    Router::new()
        .route("/run", post(run_cycle))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn run_cycle(
    State(state): State<TriggerState>,
) -> Result<Json<RunSummary>, (StatusCode, String)> {
    let _guard = state.run_lock.lock().await;

    match tokio::time::timeout(state.run_timeout, state.poller.run()).await {
        Ok(Ok(summary)) => Ok(Json(summary)),
        Ok(Err(e)) => {
            error!(error = %e, "Run failed");
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
        Err(_) => {
            error!("Run exceeded the overall timeout");
            Err((
                StatusCode::BAD_GATEWAY,
                format!("run exceeded {}s timeout", state.run_timeout.as_secs()),
            ))
        }
    }
}
