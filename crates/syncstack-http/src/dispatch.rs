//! Table operation dispatch.

use syncstack_dynamodb_core::SyncStackDynamoDB;
use syncstack_dynamodb_model::{DynamoDBError, DynamoDBOperation};

use crate::body::SyncStackBody;
use crate::response::json_response;

/// Run one table operation against the provider and serialize its output.
pub fn dispatch_dynamodb(
    provider: &SyncStackDynamoDB,
    op: DynamoDBOperation,
    body: &[u8],
    request_id: &str,
) -> Result<http::Response<SyncStackBody>, DynamoDBError> {
    match op {
        DynamoDBOperation::CreateTable => {
            let output = provider.handle_create_table(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::DeleteTable => {
            let output = provider.handle_delete_table(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::DescribeTable => {
            let output = provider.handle_describe_table(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::ListTables => {
            let output = provider.handle_list_tables(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::PutItem => {
            let output = provider.handle_put_item(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::GetItem => {
            let output = provider.handle_get_item(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::UpdateItem => {
            let output = provider.handle_update_item(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::DeleteItem => {
            let output = provider.handle_delete_item(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::Query => {
            let output = provider.handle_query(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::Scan => {
            let output = provider.handle_scan(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::BatchGetItem => {
            let output = provider.handle_batch_get_item(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::BatchWriteItem => {
            let output = provider.handle_batch_write_item(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::TransactWriteItems => {
            let output = provider.handle_transact_write_items(deserialize(body)?)?;
            serialize(&output, request_id)
        }
        DynamoDBOperation::TransactGetItems => {
            let output = provider.handle_transact_get_items(deserialize(body)?)?;
            serialize(&output, request_id)
        }
    }
}

/// Deserialize a JSON request body; an empty body reads as `{}`.
fn deserialize<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, DynamoDBError> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| {
        DynamoDBError::serialization_exception(format!("Failed to deserialize request body: {e}"))
    })
}

fn serialize<T: serde::Serialize>(
    output: &T,
    request_id: &str,
) -> Result<http::Response<SyncStackBody>, DynamoDBError> {
    let json = serde_json::to_vec(output)
        .map_err(|e| DynamoDBError::internal_error(format!("Failed to serialize response: {e}")))?;
    Ok(json_response(json, request_id))
}
