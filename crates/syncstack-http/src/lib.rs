//! HTTP front end for SyncStack.
//!
//! One hyper service answers the DynamoDB JSON protocol on `/`, GraphQL
//! operations on `/graphql` and health probes on `/health`.

pub mod body;
pub mod dispatch;
pub mod response;
pub mod router;
pub mod service;

pub use body::SyncStackBody;
pub use service::SyncStackHttpService;
