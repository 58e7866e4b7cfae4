pub mod config;
pub mod error;
pub mod rule;

pub use config::SchedulerConfig;
pub use error::*;
pub use rule::*;
