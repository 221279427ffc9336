//! Bridges from internal errors to `AppSyncError`.
//!
//! The functions take errors by value because they are used as `.map_err()`
//! arguments.

use serde_json::json;
use syncstack_appsync_model::AppSyncError;
use syncstack_dynamodb_model::DynamoDBError;

use crate::template::TemplateError;

/// Convert a template error.
///
/// Caps become `ResourceLimitExceeded`, `$util.error` a custom error with the
/// template's type and data, everything else `TemplateEvaluationError`.
#[must_use]
pub fn template_error_to_appsync(e: TemplateError) -> AppSyncError {
    match e {
        TemplateError::LimitExceeded { .. } => AppSyncError::resource_limit_exceeded(e.to_string()),
        TemplateError::Custom {
            message,
            error_type,
            data,
            error_info,
        } => AppSyncError::custom(message, error_type, data, error_info),
        TemplateError::Unauthorized => AppSyncError::unauthorized(),
        other => AppSyncError::template(other.to_string()).with_source(other),
    }
}

/// Convert a table store error into a data source error typed
/// `DynamoDB:<code>`. Transaction cancellation reasons go to `data`.
#[must_use]
pub fn dynamodb_error_to_appsync(e: DynamoDBError) -> AppSyncError {
    let mut error = AppSyncError::data_source(e.message.clone())
        .with_error_type(format!("DynamoDB:{}", e.code.as_str()));
    if !e.cancellation_reasons.is_empty() {
        error.data = Some(json!({"cancellationReasons": e.cancellation_reasons}));
    }
    error.with_source(e)
}

#[cfg(test)]
mod tests {
    use syncstack_appsync_model::AppSyncErrorCode;
    use syncstack_dynamodb_model::types::CancellationReason;

    use super::*;

    #[test]
    fn test_should_map_limits_to_resource_limit_exceeded() {
        let err = template_error_to_appsync(TemplateError::LimitExceeded {
            limit: "step",
            max: 10,
        });
        assert_eq!(err.code, AppSyncErrorCode::ResourceLimitExceeded);
    }

    #[test]
    fn test_should_type_store_errors_by_code() {
        let store = DynamoDBError::transaction_canceled(vec![
            CancellationReason::none(),
            CancellationReason::conditional_check_failed(),
        ]);
        let err = dynamodb_error_to_appsync(store);
        assert_eq!(err.error_type(), "DynamoDB:TransactionCanceledException");
        assert_eq!(
            err.data.unwrap()["cancellationReasons"][1]["Code"],
            "ConditionalCheckFailed"
        );
    }
}
