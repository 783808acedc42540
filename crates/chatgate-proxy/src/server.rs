//! Standalone server and its lifecycle.
//!
//! [`GatewayServer`] follows a bind-then-report pattern: `start` binds the
//! listener first and only returns the real address once it is listening.
//! `status` tells a clean stop from a crash by checking whether the task's
//! cancellation token was fired.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use chatgate_core::ConfigError;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::gateway::Gateway;
use crate::transport::TransportError;

/// How long `stop` waits for in-flight requests before aborting.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to bind to {address}: {reason}")]
    BindFailed { address: String, reason: String },

    #[error("Gateway is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("Gateway is not running")]
    NotRunning,

    #[error("Server error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serve `gateway` on a pre-bound listener until `cancel` fires.
///
/// Cancellation also shuts the gateway down, so open upstream calls and
/// streams end instead of holding the graceful shutdown open.
pub async fn serve(
    listener: TcpListener,
    gateway: Gateway,
    cancel: CancellationToken,
) -> Result<(), ServeError> {
    let addr = listener.local_addr()?;
    info!(
        %addr,
        upstream = %gateway.config().upstream_url,
        prefix = gateway.config().path_prefix().unwrap_or(""),
        "Gateway listening"
    );

    let app = gateway
        .router()
        .into_make_service_with_connect_info::<SocketAddr>();

    let shutdown_gateway = gateway.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            shutdown_gateway.shutdown();
        })
        .await?;

    info!("Gateway shut down");
    Ok(())
}

struct ServerHandle {
    cancel: CancellationToken,
    join: JoinHandle<Result<(), ServeError>>,
    bound_addr: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Running { address: SocketAddr },
    /// The server task ended without being asked to.
    Crashed,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Running { address } => write!(f, "Running on {address}"),
            Self::Crashed => write!(f, "Crashed"),
        }
    }
}

/// Owns at most one running gateway server.
#[derive(Default)]
pub struct GatewayServer {
    handle: Mutex<Option<ServerHandle>>,
}

impl fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayServer").finish_non_exhaustive()
    }
}

impl GatewayServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `addr` and start serving `gateway`. Returns the bound address.
    pub async fn start(&self, gateway: Gateway, addr: &str) -> Result<SocketAddr, ServeError> {
        let mut guard = self.handle.lock().await;

        if let Some(old) = guard.take() {
            if !old.join.is_finished() {
                let running = old.bound_addr;
                *guard = Some(old);
                return Err(ServeError::AlreadyRunning(running));
            }
            match old.join.await {
                Ok(Ok(())) => debug!("Previous gateway task completed normally"),
                Ok(Err(e)) => warn!("Previous gateway task ended with error: {e}"),
                Err(e) => warn!("Previous gateway task panicked: {e}"),
            }
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServeError::BindFailed {
                address: addr.to_string(),
                reason: e.to_string(),
            })?;
        let bound_addr = listener
            .local_addr()
            .map_err(|e| ServeError::Internal(format!("Failed to get local address: {e}")))?;
        info!("Gateway bound to {bound_addr}");

        let cancel = CancellationToken::new();
        let join = tokio::spawn(serve(listener, gateway, cancel.clone()));

        *guard = Some(ServerHandle {
            cancel,
            join,
            bound_addr,
        });
        Ok(bound_addr)
    }

    /// Signal shutdown and wait up to five seconds before aborting.
    pub async fn stop(&self) -> Result<(), ServeError> {
        let mut guard = self.handle.lock().await;
        let Some(handle) = guard.take() else {
            return Err(ServeError::NotRunning);
        };

        info!("Stopping gateway on {}", handle.bound_addr);
        handle.cancel.cancel();

        let mut join = handle.join;
        match tokio::time::timeout(STOP_TIMEOUT, &mut join).await {
            Ok(Ok(Ok(()))) => {
                info!("Gateway stopped cleanly");
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                error!("Gateway task ended with error: {e}");
                Err(e)
            }
            Ok(Err(join_err)) => {
                error!("Gateway task panicked: {join_err}");
                Err(ServeError::Internal(format!("Task panicked: {join_err}")))
            }
            Err(_) => {
                warn!("Gateway stop timed out; aborting task");
                join.abort();
                Err(ServeError::Internal(
                    "Gateway stop timed out; task aborted".into(),
                ))
            }
        }
    }

    pub async fn status(&self) -> ServerStatus {
        let mut guard = self.handle.lock().await;
        let Some(handle) = guard.as_ref() else {
            return ServerStatus::Stopped;
        };

        if !handle.join.is_finished() {
            return ServerStatus::Running {
                address: handle.bound_addr,
            };
        }

        let was_cancelled = handle.cancel.is_cancelled();
        *guard = None;
        if was_cancelled {
            ServerStatus::Stopped
        } else {
            warn!("Detected crashed gateway, cleaning up handle");
            ServerStatus::Crashed
        }
    }

    /// The bound address while running.
    pub async fn bound_address(&self) -> Option<SocketAddr> {
        let guard = self.handle.lock().await;
        guard
            .as_ref()
            .filter(|h| !h.join.is_finished())
            .map(|h| h.bound_addr)
    }
}
