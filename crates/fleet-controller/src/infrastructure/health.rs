//! Liveness and readiness endpoints for the kubelet probes.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use core::error::Error;
use error_stack::Report;
use poem::get;
use poem::handler;
use poem::http::StatusCode;
use poem::listener::TcpListener;
use poem::web::Data;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Response;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use crate::domain::types::Kind;

const WATCHED_KINDS: [Kind; 3] = [Kind::Node, Kind::Pod, Kind::GpuJob];

#[derive(Debug, derive_more::Display)]
pub enum HealthError {
    #[display("Health server failed: {message}")]
    ServerError { message: String },
}

impl Error for HealthError {}

/// Ready once the worker pool runs and every watch has delivered its
/// initial listing.
#[derive(Debug, Default)]
pub struct Readiness {
    controller_started: AtomicBool,
    synced: Mutex<HashSet<Kind>>,
}

impl Readiness {
    pub fn mark_controller_started(&self) {
        self.controller_started.store(true, Ordering::SeqCst);
    }

    pub fn mark_synced(&self, kind: Kind) {
        self.synced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind);
    }

    pub fn is_ready(&self) -> bool {
        if !self.controller_started.load(Ordering::SeqCst) {
            return false;
        }
        let synced = self.synced.lock().unwrap_or_else(PoisonError::into_inner);
        WATCHED_KINDS.iter().all(|kind| synced.contains(kind))
    }
}

#[handler]
fn health() -> &'static str {
    "OK\n"
}

#[handler]
fn ready(readiness: Data<&Arc<Readiness>>) -> Response {
    if readiness.is_ready() {
        Response::builder().status(StatusCode::OK).body("OK\n")
    } else {
        Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body("starting\n")
    }
}

fn routes(readiness: Arc<Readiness>) -> impl Endpoint {
    Route::new()
        .at("/health", get(health))
        .at("/ready", get(ready))
        .data(readiness)
}

/// HTTP server answering `/health` and `/ready`
pub struct HealthServer {
    listen_addr: String,
    readiness: Arc<Readiness>,
}

impl HealthServer {
    pub fn new(listen_addr: String, readiness: Arc<Readiness>) -> Self {
        Self {
            listen_addr,
            readiness,
        }
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// - [`HealthError::ServerError`] if the server fails to bind or serve
    pub async fn run(
        &self,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<HealthError>> {
        info!("Starting health server on {}", self.listen_addr);

        let app = routes(self.readiness.clone());
        let server = Server::new(TcpListener::bind(self.listen_addr.clone()));

        tokio::select! {
            result = server.run(app) => {
                result.map_err(|e| {
                    error!("Health server failed: {e}");
                    Report::new(HealthError::ServerError {
                        message: format!("{}: {e}", self.listen_addr),
                    })
                })
            }
            _ = cancellation_token.cancelled() => {
                info!("Health server shutdown requested");
                Ok(())
            }
        }
    }
}
