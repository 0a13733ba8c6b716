//! Bounded fan-out of layer downloads
//!
//! One tokio task per unique layer digest, gated by a semaphore sized from
//! `max_concurrent_layers`. The platform is finished only after every task
//! has been joined.

pub mod fetcher;

pub use fetcher::{ConcurrentFetcher, LayerSummary};
