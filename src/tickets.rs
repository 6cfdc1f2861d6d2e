pub use self::channel_manager::TicketChannelManager;
pub use self::lifecycle::{CloseOutcome, TicketLifecycle};
pub use self::restore::{QueuedMessage, RestoreQueue};

pub mod channel_manager;
pub mod lifecycle;
pub mod restore;
