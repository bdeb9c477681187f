//! Tower middleware that consults the admission gate before the router.

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::{self, Either, Ready};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

use crate::admission::{AdmissionStrategy, KeyExtractor};

/// Message carried in the body of every rejection.
pub const REJECTION_MESSAGE: &str = "Rate limit exceeded";

#[derive(Debug, Serialize)]
struct Rejection {
    success: bool,
    message: &'static str,
}

/// The response sent in place of the router's when a request is rejected.
pub fn rejection_response() -> Response {
    let body = Rejection {
        success: false,
        message: REJECTION_MESSAGE,
    };
    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
}

/// Wraps a service so every request passes the admission gate first.
#[derive(Debug)]
pub struct AdmissionLayer<G>
where
    G: ?Sized,
{
    gate: Arc<G>,
    extractor: KeyExtractor,
}

impl<G> Clone for AdmissionLayer<G>
where
    G: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
            extractor: self.extractor.clone(),
        }
    }
}

impl<G> AdmissionLayer<G>
where
    G: AdmissionStrategy + ?Sized,
{
    pub fn new(gate: Arc<G>, extractor: KeyExtractor) -> Self {
        Self { gate, extractor }
    }
}

impl<G, S> Layer<S> for AdmissionLayer<G>
where
    G: ?Sized,
{
    type Service = AdmissionService<G, S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            gate: Arc::clone(&self.gate),
            extractor: self.extractor.clone(),
        }
    }
}

/// Service produced by [`AdmissionLayer`].
///
/// Admitted requests are handed to the inner service untouched and the gate
/// never sees the response. Rejected requests are answered here with a 429
/// and never reach the inner service.
#[derive(Debug)]
pub struct AdmissionService<G, S>
where
    G: ?Sized,
{
    inner: S,
    gate: Arc<G>,
    extractor: KeyExtractor,
}

impl<G, S> Clone for AdmissionService<G, S>
where
    G: ?Sized,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gate: Arc::clone(&self.gate),
            extractor: self.extractor.clone(),
        }
    }
}

impl<G, S> Service<Request> for AdmissionService<G, S>
where
    G: AdmissionStrategy + ?Sized,
    S: Service<Request, Response = Response>,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Either<Ready<Result<Response, S::Error>>, S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let remote = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let key = self.extractor.extract(remote, req.headers());

        if self.gate.admit(&key, Instant::now()) {
            Either::Right(self.inner.call(req))
        } else {
            Either::Left(future::ok(rejection_response()))
        }
    }
}
