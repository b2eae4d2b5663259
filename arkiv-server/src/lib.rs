//! # arkiv-server
//!
//! HTTP surface of the arkiv ticket archiver: webhook intake with HMAC
//! verification, admission control and backpressure, the jobs/queue admin
//! endpoints, the admin dashboard, metrics, and liveness.

pub mod auth;
pub mod handlers;
pub mod middleware;
pub mod responses;
pub mod routes;
pub mod state;

pub use routes::create_app;
pub use state::AppState;
