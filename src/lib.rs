pub mod attachments;
pub mod backoff;
pub mod config;
pub mod errors;
pub mod extract;
pub mod generator;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod publisher;
pub mod readiness;
pub mod server;
pub mod telemetry;
