//! HTTP server wiring: listener, admission gate, router.

use axum::extract::Request;
use axum::{Router, ServiceExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::Layer;
use tracing::{error, info, warn};

use super::layer::{AdmissionLayer, AdmissionService};
use crate::admission::{spawn_sweeper, AdmissionGate, KeyExtractor};
use crate::error::{NotegateError, Result};

/// HTTP server that puts the admission gate in front of the router.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared admission gate
    gate: Arc<AdmissionGate>,
    /// Client key derivation
    extractor: KeyExtractor,
    /// Application routes, reached only by admitted requests
    router: Router,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(
        addr: SocketAddr,
        gate: Arc<AdmissionGate>,
        extractor: KeyExtractor,
        router: Router,
    ) -> Self {
        Self {
            addr,
            gate,
            extractor,
            router,
        }
    }

    /// The router wrapped in the admission middleware.
    pub fn app(&self) -> AdmissionService<AdmissionGate, Router> {
        AdmissionLayer::new(Arc::clone(&self.gate), self.extractor.clone())
            .layer(self.router.clone())
    }

    /// Start the server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            NotegateError::Io(e)
        })?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let settings = *self.gate.settings();

        if let Some(header) = self.extractor.forwarded_header() {
            warn!(
                header = %header,
                "Trusted-proxy mode enabled: clients are keyed by a request header. \
                 Unsafe unless every request passes through a proxy that rewrites it"
            );
        }

        info!(
            addr = %local_addr,
            window = ?settings.window,
            limit = settings.limit,
            algorithm = ?settings.algorithm,
            "Starting HTTP server behind admission gate"
        );

        let sweeper = spawn_sweeper(&self.gate);
        let app = ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(self.app());

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                NotegateError::Io(e)
            });

        sweeper.abort();
        info!("HTTP server stopped");
        result
    }
}
