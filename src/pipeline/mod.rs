//! Digest run pipeline.
//!
//! - `backoff`: rate-limit and notification retry policies
//! - `fetch`: cursor-paginated fetch loop for one source
//! - `aggregate`: fan-out/fan-in across a schedule's sources
//! - `commit`: notify, then drain the queue and advance cursors
//! - `run`: `DigestRunner`, the entry point fired by triggers

pub mod aggregate;
pub mod backoff;
pub mod commit;
pub mod fetch;
pub mod run;

pub use aggregate::{DigestBatch, fetch_all_sources};
pub use backoff::{RateLimitPolicy, RetryPolicy};
pub use commit::{CommitProtocol, CommitReport};
pub use fetch::{FetchOutcome, Fetcher};
pub use run::{DigestRunner, RunReport};
