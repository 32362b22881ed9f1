//! Keyed async query cache.
//!
//! A [`QueryClient`] runs fetch operations per key, collapses concurrent
//! requests for the same key into one in-flight operation, and publishes
//! every state transition to subscribers.

mod client;
mod state;
mod subscription;

pub use client::{QueryClient, QueryOptions};
pub use state::{QueryState, RenderState};
pub use subscription::Subscription;
