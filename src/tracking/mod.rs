pub mod controller;
pub mod error;
pub mod health;
pub mod persistence;
pub mod pipeline;
pub mod recovery;
pub mod session;
pub mod status;
pub mod watchers;

pub use controller::TrackingController;
pub use error::{TrackingError, TrackingResult};
pub use session::{RunSession, SessionState};
pub use status::{TrackingEvent, TrackingStatus};
