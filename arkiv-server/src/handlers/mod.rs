pub mod admin;
pub mod healthz;
pub mod ingest;
pub mod jobs;
pub mod metrics;
