pub mod config;
pub mod logging;

pub use config::load_layered;
pub use logging::{init_logging, init_test_logging, LogFormat, LoggingConfig};
