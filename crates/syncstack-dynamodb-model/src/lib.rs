//! DynamoDB model types for SyncStack.
//!
//! Hand-written serde types for the DynamoDB JSON protocol subset the emulator
//! serves, plus the error taxonomy shared by the storage engine and the
//! resolver pipeline.
// "DynamoDB" appears in virtually every doc comment in this crate.
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod attribute_value;
pub mod error;
pub mod input;
pub mod operations;
pub mod output;
pub mod types;

pub use attribute_value::{AttributeValue, Item};
pub use error::{DynamoDBError, DynamoDBErrorCode};
pub use operations::DynamoDBOperation;
