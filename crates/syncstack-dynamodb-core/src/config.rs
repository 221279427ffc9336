//! DynamoDB configuration.

use std::env;

/// DynamoDB service configuration.
#[derive(Debug, Clone)]
pub struct DynamoDBConfig {
    /// Region used in table ARNs.
    pub default_region: String,
    /// Account id used in table ARNs.
    pub account_id: String,
    /// Maximum size of a single item.
    pub max_item_size_bytes: u64,
    /// Byte budget of one query or scan page.
    pub max_page_bytes: u64,
    /// Maximum operations in one `TransactWriteItems`/`TransactGetItems`.
    pub max_transact_items: usize,
    /// Maximum requests in one `BatchWriteItem`.
    pub max_batch_write_items: usize,
    /// Maximum keys in one `BatchGetItem`.
    pub max_batch_get_items: usize,
}

impl DynamoDBConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_region: env::var("DEFAULT_REGION").unwrap_or(defaults.default_region),
            account_id: env::var("DYNAMODB_ACCOUNT_ID").unwrap_or(defaults.account_id),
            max_item_size_bytes: env_parse("DYNAMODB_MAX_ITEM_SIZE_BYTES", defaults.max_item_size_bytes),
            max_page_bytes: env_parse("DYNAMODB_MAX_PAGE_BYTES", defaults.max_page_bytes),
            max_transact_items: env_parse("DYNAMODB_MAX_TRANSACT_ITEMS", defaults.max_transact_items),
            max_batch_write_items: env_parse("DYNAMODB_MAX_BATCH_WRITE_ITEMS", defaults.max_batch_write_items),
            max_batch_get_items: env_parse("DYNAMODB_MAX_BATCH_GET_ITEMS", defaults.max_batch_get_items),
        }
    }
}

impl Default for DynamoDBConfig {
    fn default() -> Self {
        Self {
            default_region: "us-east-1".to_owned(),
            account_id: "000000000000".to_owned(),
            max_item_size_bytes: 400 * 1024,
            max_page_bytes: 1024 * 1024,
            max_transact_items: 100,
            max_batch_write_items: 25,
            max_batch_get_items: 100,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
