pub mod run;
pub mod sample;
pub mod segment;
pub mod snapshot;

pub use run::{Run, RunSummary};
pub use sample::{haversine_m, Fix, Sample, SampleSource};
pub use segment::Segment;
pub use snapshot::{SegmentBounds, Snapshot, SNAPSHOT_VERSION};
