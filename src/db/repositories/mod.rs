pub mod runs;
pub mod snapshots;
