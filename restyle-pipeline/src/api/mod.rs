//! HTTP API handlers for restyle-pipeline
//!
//! Job submission and read model over REST, progress over SSE.

pub mod health;
pub mod jobs;
pub mod sse;

pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::event_stream;
