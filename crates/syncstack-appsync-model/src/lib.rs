//! AppSync model types for SyncStack.
//!
//! The GraphQL surface of the emulator takes operations that an external
//! parser has already validated against the schema, so the types here
//! describe a resolved selection tree rather than GraphQL source text.
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod definition;
pub mod error;
pub mod operation;
pub mod request;

pub use definition::{
    DataSourceDefinition, DataSourceType, Definition, FunctionDefinition, ResolverDefinition,
    ResolverKind, SubscriptionDefinition, SubscriptionFilter,
};
pub use error::{AppSyncError, AppSyncErrorCode};
pub use operation::{Operation, OperationType, Selection};
pub use request::{FieldError, GraphQLRequest, GraphQLResponse, PathSegment};
