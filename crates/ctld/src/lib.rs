pub mod auth;
pub mod common;
pub mod job;
pub mod partition;
pub mod reservation;
pub mod state;
pub mod status;

mod ids;

pub use auth::{Authority, StaticAuthority};
pub use ids::{Gid, JobId, Uid};
pub use job::{JobDescriptor, JobRecord, JobState};
pub use partition::{Partition, PartitionFlags};
pub use reservation::{Reservation, ReservationFlags};
pub use state::{ControllerState, JobTable, PartitionTable, ReservationTable, Stamp};

pub type Error = crate::common::error::CtldError;
pub type Result<T> = std::result::Result<T, Error>;
