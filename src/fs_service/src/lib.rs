pub mod fs_service;

mod reclaimer;

pub use fs_service::FileSystemService;
pub use reclaimer::{OrphanReclaimer, ReclaimStats, DEFAULT_RECLAIM_BATCH_SIZE};

#[cfg(test)]
mod fs_service_tests;
