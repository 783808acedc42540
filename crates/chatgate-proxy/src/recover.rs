//! Panic containment.
//!
//! Handlers run under a `CatchPanicLayer`; detached relay tasks run under
//! [`spawn_guarded`]. Both treat a [`StreamAborted`] payload as a normal end
//! of stream and anything else as a fault.

use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;
use tracing::{error, info};

/// Panic payload that abandons the current response without it counting as
/// a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamAborted;

/// Abandon the current response quietly.
pub fn abort_stream() -> ! {
    std::panic::panic_any(StreamAborted)
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Response for a panic caught at the handler boundary.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    if payload.is::<StreamAborted>() {
        info!("Stream completed normally");
        return StatusCode::OK.into_response();
    }

    let message = panic_message(payload.as_ref());
    let backtrace = Backtrace::force_capture();
    error!(panic = %message, backtrace = %backtrace, "Panic recovered");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal server error" })),
    )
        .into_response()
}

/// Spawn `task`, logging instead of propagating any panic it raises.
pub fn spawn_guarded<F>(task: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(payload) = AssertUnwindSafe(task).catch_unwind().await {
            if payload.is::<StreamAborted>() {
                info!("Stream completed normally");
            } else {
                error!(
                    panic = %panic_message(payload.as_ref()),
                    "Relay task panicked"
                );
            }
        }
    })
}
