//! Relay core: ingest, per-pair ordering, group provisioning and dispatch.
//!
//! Events from both platform streams enter through [`Relay::ingest`], are
//! admitted against the dedup guard, and queue on a lane keyed by
//! (conversation, direction). Each lane hands its work to the dispatcher
//! one item at a time.

mod dispatch;
mod filter;
mod guard;
mod ingest;
mod orchestrator;
mod ordering;
mod provision;

#[cfg(test)]
pub mod testing;

pub use guard::DedupGuard;
pub use orchestrator::Relay;
