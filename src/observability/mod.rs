//! # Observability
//!
//! Structured logging for services built on the runtime. Development runs log
//! everything in a human-readable format; production runs emit JSON at the
//! level named by `TRACE_LEVEL`.

pub mod logging;

pub use logging::{init_logging, log_config_info, logging_filter};
