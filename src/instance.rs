pub use self::manager::{CreateInstanceOptions, Instance, InstanceManager, InstanceStatus, QrOutcome};
pub use self::setup::{SetupSession, SetupStore};

pub mod manager;
pub mod setup;
