//! HTTP surface: the admission middleware and the server that wires it
//! in front of the application router.

mod headers;
mod layer;
mod server;

pub use headers::with_response_layers;
pub use layer::{rejection_response, AdmissionLayer, AdmissionService, REJECTION_MESSAGE};
pub use server::HttpServer;
