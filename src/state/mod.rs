//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlState`: The orchestrator's phase (init, paging, throttled, draining, done, failed)
//! - `Checkpoint`: The durable resume position (`since` cursor and `totalFetched`)
//! - `CheckpointStore`: Atomic persistence of the checkpoint

mod checkpoint;
mod crawl_state;

// Re-export main types
pub use checkpoint::{read_checkpoint, Checkpoint, CheckpointStore, FileCheckpointStore};
pub use crawl_state::CrawlState;
