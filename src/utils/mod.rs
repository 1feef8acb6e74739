//! Utility helpers: logging setup and timing

mod logger;
mod timer;

pub use logger::{init_agent_logger, init_logger, LogLevel};
pub use timer::{Stopwatch, Timer};
