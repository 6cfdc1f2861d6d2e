pub use self::config_store::ConfigStore;
pub use self::error::StoreError;
pub use self::models::{InstanceIdentity, InstanceSettings, SpecialChannel, TicketStatus};

pub mod config_store;
pub mod error;
pub mod models;
