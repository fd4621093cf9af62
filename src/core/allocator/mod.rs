//! Block allocation for the payload region
//!
//! Payload space is handed out in whole clusters:
//! - Free blocks are indexed by their cluster-rounded length
//! - The smallest sufficient free block is reused, splitting off the tail
//! - Otherwise a new block is appended at the end of the medium

mod block;
mod free_list;

pub use block::BlockAllocator;
pub use free_list::FreeLengthMap;

pub use crate::header::{clusters_for, round_up, CLUSTER_SIZE};
