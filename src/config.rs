pub use self::parser::{
    AuthConfig, Config, LimitsConfig, LoggingConfig, StorageConfig, TicketsConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
