//! # arkiv-core
//!
//! Processing engine of the arkiv ticket archiver: the webhook-to-archive
//! pipeline, the durable Redis Streams queue, the policy-constrained
//! storage writer, and the Zammad upstream client.
//!
//! ## Architecture
//!
//! - [`payload`] parses webhook payloads into ticket ids plus an opaque map.
//! - [`pipeline`] owns a single run: locks, snapshot, render, sign, atomic
//!   group commit, tag transitions, notes, history, metrics.
//! - [`queue`] is the durable path: envelopes, consumer-group worker,
//!   delayed redelivery, DLQ, history stream.
//! - [`storage`] + [`path_policy`] keep every write confined to the
//!   storage root with deterministic, sanitized names.
//! - [`zammad`], [`render`], [`signing`] are the external capability seams.
//! - [`context`] wires everything into one startup-owned object.

pub mod audit;
pub mod classify;
pub mod clock;
pub mod context;
pub mod error;
pub mod idempotency;
pub mod inflight;
pub mod metrics;
pub mod notes;
pub mod path_policy;
pub mod payload;
pub mod pipeline;
pub mod queue;
pub mod render;
pub mod shutdown;
pub mod signing;
pub mod snapshot;
pub mod state;
pub mod storage;
pub mod zammad;

pub use context::{AppContext, Dispatch};
pub use error::{ArchiveError, Classification};
pub use pipeline::{JobProcessor, Outcome, Pipeline};
