//! Configuration and error types shared by every SyncStack crate.
//!
//! The emulator is configured once at start from the environment; the
//! optional emulator definition path points at the JSON document describing
//! tables, data sources and resolvers.

mod config;
mod error;

pub use config::SyncStackConfig;
pub use error::{SyncStackError, SyncStackResult};
