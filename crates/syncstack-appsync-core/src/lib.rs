//! AppSync resolver engine for SyncStack.
//!
//! Mapping templates render data source requests, data sources run them
//! against the table store or an embedder-supplied function invoker, and the
//! subscription broker fans mutation results out to subscribers.
#![allow(clippy::doc_markdown, clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod datasource;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod subscription;
pub mod template;

pub use config::AppSyncConfig;
pub use datasource::{FnInvoker, FunctionInvoker};
pub use executor::SyncStackAppSync;
pub use subscription::{Subscription, SubscriptionBroker, SubscriptionEvent};
