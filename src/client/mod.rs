//! Client-side orchestration of a competition view: local countdown,
//! deadline auto-submission and reconciliation with room events.

pub mod api;
pub mod clock;
pub mod controller;
#[cfg(feature = "http-client")]
pub mod http;
pub mod local;

pub use api::{ApiError, CompetitionApi, RoomSignal, RoomStream, with_single_retry};
pub use clock::{CountdownClock, Tick, remaining_ms};
pub use controller::{CompetitionController, ControllerCommand, ControllerOptions, ControllerUpdate};
#[cfg(feature = "http-client")]
pub use http::HttpCompetitionApi;
pub use local::LocalCompetitionApi;
