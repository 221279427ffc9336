//! AppSync-specific configuration.
//!
//! Provides [`AppSyncConfig`] for the resolver executor and template limits.
//! Values are loaded from `APPSYNC_*` environment variables.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::template::TemplateLimits;

/// AppSync service configuration.
///
/// # Examples
///
/// ```
/// use syncstack_appsync_core::config::AppSyncConfig;
///
/// let config = AppSyncConfig::default();
/// assert_eq!(config.max_foreach_iterations, 1000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct AppSyncConfig {
    /// GraphQL operations executing at once; further operations wait.
    #[builder(default = 64)]
    pub max_concurrent_operations: usize,

    /// Evaluation steps one template may take.
    #[builder(default = 100_000)]
    pub max_template_steps: usize,

    /// Nesting depth of template syntax and of expression evaluation.
    #[builder(default = 64)]
    pub max_template_depth: usize,

    /// Iterations of one `#foreach` loop.
    #[builder(default = 1000)]
    pub max_foreach_iterations: usize,

    /// Bytes one template may render.
    #[builder(default = 1024 * 1024)]
    pub max_template_output_bytes: usize,

    /// Pending payloads per subscription connection before delivery drops.
    #[builder(default = 256)]
    pub subscription_buffer: usize,
}

impl Default for AppSyncConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AppSyncConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `APPSYNC_MAX_CONCURRENT_OPERATIONS` | `64` |
    /// | `APPSYNC_MAX_TEMPLATE_STEPS` | `100000` |
    /// | `APPSYNC_MAX_TEMPLATE_DEPTH` | `64` |
    /// | `APPSYNC_MAX_FOREACH_ITERATIONS` | `1000` |
    /// | `APPSYNC_MAX_TEMPLATE_OUTPUT_BYTES` | `1048576` |
    /// | `APPSYNC_SUBSCRIPTION_BUFFER` | `256` |
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_operations: env_parse(
                "APPSYNC_MAX_CONCURRENT_OPERATIONS",
                defaults.max_concurrent_operations,
            )
            .max(1),
            max_template_steps: env_parse("APPSYNC_MAX_TEMPLATE_STEPS", defaults.max_template_steps),
            max_template_depth: env_parse("APPSYNC_MAX_TEMPLATE_DEPTH", defaults.max_template_depth),
            max_foreach_iterations: env_parse(
                "APPSYNC_MAX_FOREACH_ITERATIONS",
                defaults.max_foreach_iterations,
            ),
            max_template_output_bytes: env_parse(
                "APPSYNC_MAX_TEMPLATE_OUTPUT_BYTES",
                defaults.max_template_output_bytes,
            ),
            subscription_buffer: env_parse("APPSYNC_SUBSCRIPTION_BUFFER", defaults.subscription_buffer)
                .max(1),
        }
    }

    /// Template limits derived from this configuration.
    #[must_use]
    pub fn template_limits(&self) -> TemplateLimits {
        TemplateLimits {
            max_steps: self.max_template_steps,
            max_depth: self.max_template_depth,
            max_foreach_iterations: self.max_foreach_iterations,
            max_output_bytes: self.max_template_output_bytes,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
