//! In-memory DynamoDB table engine for SyncStack.
//!
//! Tables live behind one `parking_lot::RwLock` each; every write (single
//! item, batch or transaction) evaluates its conditions and maintains all
//! secondary indexes inside that lock, so readers never observe an item
//! without its index entries. Committed writes are published on a change feed
//! after the lock is released.
#![allow(clippy::doc_markdown, clippy::module_name_repetitions)]

pub mod change;
pub mod config;
pub mod cursor;
pub mod error;
pub mod expression;
pub mod index;
pub mod number;
pub mod provider;
pub mod query;
pub mod state;
pub mod storage;

pub use change::ChangeEvent;
pub use config::DynamoDBConfig;
pub use provider::SyncStackDynamoDB;
