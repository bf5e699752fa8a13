pub mod graceful_shutdown;
pub mod log_throttle;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
pub use log_throttle::{CANCELLATION_LOG_WINDOW, LogThrottle};
