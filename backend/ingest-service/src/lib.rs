//! Firehose ingester.
//!
//! One consumer task reads the upstream websocket, one timer task flushes
//! batched writes; both share a mutex-guarded pending batch. The cursor
//! advances only after a flush commits, so a crash replays events and the
//! store's uniqueness constraints absorb the duplicates.

pub mod batcher;
pub mod config;
pub mod event;
pub mod firehose;
pub mod tracked;

pub use config::IngestConfig;
