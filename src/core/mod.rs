pub mod config;
pub mod health;
pub mod logging;

pub use config::{Config, FeedMode};
pub use health::HealthChecker;
