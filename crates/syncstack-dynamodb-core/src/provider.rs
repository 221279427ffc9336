//! DynamoDB provider implementing every table operation.
//!
//! Writes of any size (single item, batch, transaction) go through one path:
//! the involved tables are write-locked in name order, every condition is
//! evaluated against the locked state, and only when all of them pass are the
//! mutations applied. Change events are sequenced while the locks are held and
//! published once they are released.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::debug;

use syncstack_dynamodb_model::error::{DynamoDBError, DynamoDBErrorCode};
use syncstack_dynamodb_model::input::{
    BatchGetItemInput, BatchWriteItemInput, CreateTableInput, DeleteItemInput, DeleteTableInput,
    DescribeTableInput, GetItemInput, ListTablesInput, PutItemInput, QueryInput, ScanInput,
    TransactGetItemsInput, TransactWriteItemsInput, UpdateItemInput,
};
use syncstack_dynamodb_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, CreateTableOutput, DeleteItemOutput,
    DeleteTableOutput, DescribeTableOutput, GetItemOutput, ListTablesOutput, PutItemOutput,
    QueryOutput, ScanOutput, TransactGetItemsOutput, TransactWriteItemsOutput, UpdateItemOutput,
};
use syncstack_dynamodb_model::types::{
    CancellationReason, ItemResponse, ReturnValue, Select, TransactWriteItem,
};
use syncstack_dynamodb_model::{AttributeValue, Item};

use crate::change::ChangeEvent;
use crate::config::DynamoDBConfig;
use crate::cursor::{self, Position, QueryShape};
use crate::error::{
    cursor_error_to_dynamodb, expression_error_to_dynamodb, key_condition_error_to_dynamodb,
    storage_error_to_dynamodb,
};
use crate::expression::{
    AttributePath, EvalContext, Expr, PathElement, Placeholders, UpdateExpr, parse_condition,
    parse_filter, parse_key_condition, parse_projection, parse_update,
};
use crate::index::{IndexKind, SecondaryIndex};
use crate::number::is_valid_number;
use crate::query::{KeyCondition, PageLimits, query_collection, scan_collection};
use crate::state::{DynamoDBServiceState, DynamoDBTable};
use crate::storage::{Collection, KeySchema, PrimaryKey, StorageError, StoredItem, TableData};

/// Default and maximum page size of `ListTables`.
const MAX_LIST_TABLES_LIMIT: usize = 100;

/// Upper bound of `TotalSegments` in a parallel scan.
const MAX_TOTAL_SEGMENTS: u32 = 1_000_000;

/// Main DynamoDB provider implementing all operations.
#[derive(Debug)]
pub struct SyncStackDynamoDB {
    /// Service state owning all tables.
    pub state: Arc<DynamoDBServiceState>,
    /// Configuration.
    pub config: Arc<DynamoDBConfig>,
}

impl SyncStackDynamoDB {
    /// Create a new DynamoDB provider.
    #[must_use]
    pub fn new(config: DynamoDBConfig) -> Self {
        Self {
            state: Arc::new(DynamoDBServiceState::new()),
            config: Arc::new(config),
        }
    }

    /// Reset all state (for testing).
    pub fn reset(&self) {
        self.state.reset();
    }

    /// Receiver for every write committed from now on.
    #[must_use]
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.state.changes().subscribe()
    }
}

// ---------------------------------------------------------------------------
// Table management
// ---------------------------------------------------------------------------

impl SyncStackDynamoDB {
    /// Handle `CreateTable`.
    pub fn handle_create_table(
        &self,
        input: CreateTableInput,
    ) -> Result<CreateTableOutput, DynamoDBError> {
        let table = DynamoDBTable::from_input(&input, &self.config)?;
        let table = self.state.create_table(table)?;
        Ok(CreateTableOutput {
            table_description: table.to_description(),
        })
    }

    /// Handle `DeleteTable`.
    #[allow(clippy::needless_pass_by_value)]
    pub fn handle_delete_table(
        &self,
        input: DeleteTableInput,
    ) -> Result<DeleteTableOutput, DynamoDBError> {
        let table = self.state.delete_table(&input.table_name)?;
        Ok(DeleteTableOutput {
            table_description: table.to_delete_description(),
        })
    }

    /// Handle `DescribeTable`.
    #[allow(clippy::needless_pass_by_value)]
    pub fn handle_describe_table(
        &self,
        input: DescribeTableInput,
    ) -> Result<DescribeTableOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name)?;
        Ok(DescribeTableOutput {
            table: table.to_description(),
        })
    }

    /// Handle `ListTables`.
    #[allow(clippy::needless_pass_by_value)]
    pub fn handle_list_tables(
        &self,
        input: ListTablesInput,
    ) -> Result<ListTablesOutput, DynamoDBError> {
        let limit = match input.limit {
            None => MAX_LIST_TABLES_LIMIT,
            Some(l) => usize::try_from(l)
                .ok()
                .filter(|l| (1..=MAX_LIST_TABLES_LIMIT).contains(l))
                .ok_or_else(|| {
                    DynamoDBError::validation(format!(
                        "1 validation error detected: Value '{l}' at 'limit' failed to satisfy \
                         constraint: Member must have value between 1 and {MAX_LIST_TABLES_LIMIT}"
                    ))
                })?,
        };

        let remaining: Vec<String> = self
            .state
            .list_table_names()
            .into_iter()
            .filter(|name| {
                input
                    .exclusive_start_table_name
                    .as_ref()
                    .is_none_or(|start| name > start)
            })
            .collect();
        let has_more = remaining.len() > limit;
        let table_names: Vec<String> = remaining.into_iter().take(limit).collect();
        let last_evaluated_table_name = if has_more {
            table_names.last().cloned()
        } else {
            None
        };

        Ok(ListTablesOutput {
            table_names,
            last_evaluated_table_name,
        })
    }
}

// ---------------------------------------------------------------------------
// Item CRUD
// ---------------------------------------------------------------------------

impl SyncStackDynamoDB {
    /// Handle `PutItem`.
    pub fn handle_put_item(&self, input: PutItemInput) -> Result<PutItemOutput, DynamoDBError> {
        let return_values = input.return_values.unwrap_or_default();
        if !matches!(return_values, ReturnValue::None | ReturnValue::AllOld) {
            return Err(DynamoDBError::validation(format!(
                "Return values set to invalid value for this operation: {return_values:?}"
            )));
        }
        validate_values(input.item.values())?;
        let names = &input.expression_attribute_names;
        let values = &input.expression_attribute_values;
        let (condition, _) = parse_write(input.condition_expression.as_deref(), None, names, values)?;

        let committed = self.write_one(PlannedWrite {
            table_name: &input.table_name,
            item: &input.item,
            condition,
            names,
            values,
            action: WriteAction::Put,
        })?;
        debug!(table = %input.table_name, replaced = committed.old.is_some(), "put item");

        Ok(PutItemOutput {
            attributes: match return_values {
                ReturnValue::AllOld => committed.old,
                _ => None,
            },
        })
    }

    /// Handle `GetItem`. A missing item is an empty result, not an error.
    #[allow(clippy::needless_pass_by_value)]
    pub fn handle_get_item(&self, input: GetItemInput) -> Result<GetItemOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name)?;
        let names = &input.expression_attribute_names;
        let projection = parse_projection_checked(input.projection_expression.as_deref(), names)?;

        let data = table.read();
        let key = data
            .key_from_request(&input.key)
            .map_err(storage_error_to_dynamodb)?;
        let item = data
            .get(&key)
            .map(|item| project(item, projection.as_deref(), names))
            .transpose()?;
        Ok(GetItemOutput { item })
    }

    /// Handle `UpdateItem`.
    ///
    /// Without an update expression the item is created from its key when
    /// absent and left untouched otherwise. With `require_existing`, a missing
    /// item fails with `ItemNotFound` instead of being created.
    pub fn handle_update_item(
        &self,
        input: UpdateItemInput,
    ) -> Result<UpdateItemOutput, DynamoDBError> {
        let names = &input.expression_attribute_names;
        let values = &input.expression_attribute_values;
        let (condition, update) = parse_write(
            input.condition_expression.as_deref(),
            input.update_expression.as_deref(),
            names,
            values,
        )?;
        let updated = self.updated_attributes(&input.table_name, update.as_ref(), names, values)?;

        let committed = self.write_one(PlannedWrite {
            table_name: &input.table_name,
            item: &input.key,
            condition,
            names,
            values,
            action: WriteAction::Update {
                update,
                require_existing: input.require_existing,
            },
        })?;
        debug!(table = %input.table_name, created = committed.old.is_none(), "updated item");

        let attributes = match input.return_values.unwrap_or_default() {
            ReturnValue::None => None,
            ReturnValue::AllOld => committed.old,
            ReturnValue::AllNew => committed.new,
            ReturnValue::UpdatedOld => committed.old.map(|item| retain_attributes(item, &updated)),
            ReturnValue::UpdatedNew => committed.new.map(|item| retain_attributes(item, &updated)),
        };
        Ok(UpdateItemOutput {
            attributes: attributes.filter(|item| !item.is_empty()),
        })
    }

    /// Handle `DeleteItem`. Deleting a missing item succeeds without effect.
    pub fn handle_delete_item(
        &self,
        input: DeleteItemInput,
    ) -> Result<DeleteItemOutput, DynamoDBError> {
        let return_values = input.return_values.unwrap_or_default();
        if !matches!(return_values, ReturnValue::None | ReturnValue::AllOld) {
            return Err(DynamoDBError::validation(format!(
                "Return values set to invalid value for this operation: {return_values:?}"
            )));
        }
        let names = &input.expression_attribute_names;
        let values = &input.expression_attribute_values;
        let (condition, _) = parse_write(input.condition_expression.as_deref(), None, names, values)?;

        let committed = self.write_one(PlannedWrite {
            table_name: &input.table_name,
            item: &input.key,
            condition,
            names,
            values,
            action: WriteAction::Delete,
        })?;
        debug!(table = %input.table_name, existed = committed.old.is_some(), "deleted item");

        Ok(DeleteItemOutput {
            attributes: match return_values {
                ReturnValue::AllOld => committed.old,
                _ => None,
            },
        })
    }

    /// Top-level attributes targeted by an update, rejecting key attributes.
    fn updated_attributes(
        &self,
        table_name: &str,
        update: Option<&UpdateExpr>,
        names: &HashMap<String, String>,
        values: &HashMap<String, AttributeValue>,
    ) -> Result<BTreeSet<String>, DynamoDBError> {
        let Some(update) = update else {
            return Ok(BTreeSet::new());
        };
        let table = self.state.require_table(table_name)?;
        let empty = Item::new();
        let ctx = EvalContext {
            item: &empty,
            names,
            values,
        };

        let mut attributes = BTreeSet::new();
        for path in update.target_paths() {
            let resolved = ctx.resolve_names(path).map_err(expression_error_to_dynamodb)?;
            let Some(PathElement::Attribute(name)) = resolved.elements.first() else {
                continue;
            };
            if table
                .key_schema_elements
                .iter()
                .any(|k| &k.attribute_name == name)
            {
                return Err(DynamoDBError::validation(format!(
                    "One or more parameter values were invalid: Cannot update attribute {name}. \
                     This attribute is part of the key"
                )));
            }
            attributes.insert(name.clone());
        }
        Ok(attributes)
    }
}

// ---------------------------------------------------------------------------
// Query & Scan
// ---------------------------------------------------------------------------

impl SyncStackDynamoDB {
    /// Handle `Query`.
    pub fn handle_query(&self, input: QueryInput) -> Result<QueryOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name)?;
        let names = &input.expression_attribute_names;
        let values = &input.expression_attribute_values;

        let key_expr =
            parse_key_condition(&input.key_condition_expression).map_err(expression_error_to_dynamodb)?;
        let filter = input
            .filter_expression
            .as_deref()
            .map(parse_filter)
            .transpose()
            .map_err(expression_error_to_dynamodb)?;
        let projection = input
            .projection_expression
            .as_deref()
            .map(parse_projection)
            .transpose()
            .map_err(expression_error_to_dynamodb)?;
        let mut placeholders = Placeholders::default();
        placeholders.add_condition(&key_expr);
        if let Some(filter) = &filter {
            placeholders.add_condition(filter);
        }
        if let Some(paths) = &projection {
            placeholders.add_projection(paths);
        }
        placeholders
            .verify(names, values)
            .map_err(expression_error_to_dynamodb)?;

        let select = resolve_select(input.select, projection.is_some(), input.index_name.is_some())?;
        let limit = page_limit(input.limit)?;
        let forward = input.scan_index_forward.unwrap_or(true);
        let shape = QueryShape {
            operation: "Query",
            table_name: &input.table_name,
            index_name: input.index_name.as_deref(),
            key_condition: Some(&input.key_condition_expression),
            filter: input.filter_expression.as_deref(),
            names,
            values,
            forward,
            segment: None,
        };
        let resume = decode_token(&shape, input.next_token.as_deref())?;

        let data = table.read();
        let source = ReadSource::select(&data, &input.table_name, input.index_name.as_deref(), select)?;
        let empty = Item::new();
        let key_ctx = EvalContext {
            item: &empty,
            names,
            values,
        };
        let condition = KeyCondition::from_expr(&key_expr, source.schema, &key_ctx)
            .map_err(key_condition_error_to_dynamodb)?;

        let page = query_collection(
            source.collection,
            &condition,
            forward,
            resume.as_ref(),
            PageLimits {
                limit,
                max_page_bytes: self.config.max_page_bytes,
            },
        );
        let next_token = page.last.as_ref().map(|p| cursor::encode(&shape, p));
        let result = finish_page(
            &data,
            &source,
            page.entries,
            &ReadOptions {
                filter: filter.as_ref(),
                projection: projection.as_deref(),
                select,
                names,
                values,
            },
        )?;
        debug!(
            table = %input.table_name,
            index = ?input.index_name,
            count = result.count,
            scanned = result.scanned_count,
            more = next_token.is_some(),
            "query page"
        );

        Ok(QueryOutput {
            items: result.items,
            count: to_count(result.count),
            scanned_count: to_count(result.scanned_count),
            next_token,
        })
    }

    /// Handle `Scan`.
    pub fn handle_scan(&self, input: ScanInput) -> Result<ScanOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name)?;
        let names = &input.expression_attribute_names;
        let values = &input.expression_attribute_values;

        let filter = input
            .filter_expression
            .as_deref()
            .map(parse_filter)
            .transpose()
            .map_err(expression_error_to_dynamodb)?;
        let projection = input
            .projection_expression
            .as_deref()
            .map(parse_projection)
            .transpose()
            .map_err(expression_error_to_dynamodb)?;
        let mut placeholders = Placeholders::default();
        if let Some(filter) = &filter {
            placeholders.add_condition(filter);
        }
        if let Some(paths) = &projection {
            placeholders.add_projection(paths);
        }
        placeholders
            .verify(names, values)
            .map_err(expression_error_to_dynamodb)?;

        let select = resolve_select(input.select, projection.is_some(), input.index_name.is_some())?;
        let limit = page_limit(input.limit)?;
        let segment = scan_segment(input.segment, input.total_segments)?;
        let shape = QueryShape {
            operation: "Scan",
            table_name: &input.table_name,
            index_name: input.index_name.as_deref(),
            key_condition: None,
            filter: input.filter_expression.as_deref(),
            names,
            values,
            forward: true,
            segment,
        };
        let resume = decode_token(&shape, input.next_token.as_deref())?;

        let data = table.read();
        let source = ReadSource::select(&data, &input.table_name, input.index_name.as_deref(), select)?;
        let page = scan_collection(
            source.collection,
            segment,
            resume.as_ref(),
            PageLimits {
                limit,
                max_page_bytes: self.config.max_page_bytes,
            },
        );
        let next_token = page.last.as_ref().map(|p| cursor::encode(&shape, p));
        let result = finish_page(
            &data,
            &source,
            page.entries,
            &ReadOptions {
                filter: filter.as_ref(),
                projection: projection.as_deref(),
                select,
                names,
                values,
            },
        )?;
        debug!(
            table = %input.table_name,
            segment = ?segment,
            count = result.count,
            scanned = result.scanned_count,
            more = next_token.is_some(),
            "scan page"
        );

        Ok(ScanOutput {
            items: result.items,
            count: to_count(result.count),
            scanned_count: to_count(result.scanned_count),
            next_token,
        })
    }
}

/// The collection a read walks: the base table or one index.
struct ReadSource<'a> {
    collection: &'a Collection,
    schema: &'a KeySchema,
    index: Option<&'a SecondaryIndex>,
}

impl<'a> ReadSource<'a> {
    fn select(
        data: &'a TableData,
        table_name: &str,
        index_name: Option<&str>,
        select: Select,
    ) -> Result<Self, DynamoDBError> {
        let Some(name) = index_name else {
            return Ok(Self {
                collection: data.base(),
                schema: data.schema(),
                index: None,
            });
        };
        let index = data.indexes().get(name).ok_or_else(|| {
            DynamoDBError::validation(format!(
                "The table does not have the specified index: {name} (table {table_name})"
            ))
        })?;
        if select == Select::AllAttributes
            && index.kind() == IndexKind::Global
            && !index.projects_all()
        {
            return Err(DynamoDBError::validation(format!(
                "One or more parameter values were invalid: Select type ALL_ATTRIBUTES is not \
                 supported for global secondary index {name} because its projection type is not ALL"
            )));
        }
        Ok(Self {
            collection: index.entries(),
            schema: index.schema(),
            index: Some(index),
        })
    }

    /// Local index entries missing requested attributes are read back from
    /// the base table.
    fn fetches_base(&self, options: &ReadOptions<'_>) -> Result<bool, DynamoDBError> {
        let Some(index) = self.index else {
            return Ok(false);
        };
        if index.kind() != IndexKind::Local || index.projects_all() {
            return Ok(false);
        }
        if options.select == Select::AllAttributes {
            return Ok(true);
        }
        let Some(paths) = options.projection else {
            return Ok(false);
        };
        let no_values = HashMap::new();
        let empty = Item::new();
        let ctx = EvalContext {
            item: &empty,
            names: options.names,
            values: &no_values,
        };
        for path in paths {
            let resolved = ctx.resolve_names(path).map_err(expression_error_to_dynamodb)?;
            if let Some(PathElement::Attribute(name)) = resolved.elements.first() {
                if !index.projects(name) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

struct ReadOptions<'a> {
    filter: Option<&'a Expr>,
    projection: Option<&'a [AttributePath]>,
    select: Select,
    names: &'a HashMap<String, String>,
    values: &'a HashMap<String, AttributeValue>,
}

struct PageResult {
    items: Vec<Item>,
    count: usize,
    scanned_count: usize,
}

/// Filters, projects and counts the examined entries of one page.
fn finish_page(
    data: &TableData,
    source: &ReadSource<'_>,
    entries: Vec<&StoredItem>,
    options: &ReadOptions<'_>,
) -> Result<PageResult, DynamoDBError> {
    let fetch_base = source.fetches_base(options)?;
    let scanned_count = entries.len();
    let mut items = Vec::new();
    let mut count = 0;

    for stored in entries {
        let item = if fetch_base {
            let key = data
                .schema()
                .extract(&stored.item)
                .map_err(storage_error_to_dynamodb)?;
            data.get(&key).unwrap_or(&stored.item)
        } else {
            &stored.item
        };
        if let Some(filter) = options.filter {
            let ctx = EvalContext {
                item,
                names: options.names,
                values: options.values,
            };
            if !ctx.evaluate(filter).map_err(expression_error_to_dynamodb)? {
                continue;
            }
        }
        count += 1;
        if options.select != Select::Count {
            items.push(project(item, options.projection, options.names)?);
        }
    }

    Ok(PageResult {
        items,
        count,
        scanned_count,
    })
}

fn resolve_select(
    select: Option<Select>,
    has_projection: bool,
    on_index: bool,
) -> Result<Select, DynamoDBError> {
    match select {
        None if has_projection => Ok(Select::SpecificAttributes),
        None if on_index => Ok(Select::AllProjectedAttributes),
        None => Ok(Select::AllAttributes),
        Some(Select::SpecificAttributes) if !has_projection => Err(DynamoDBError::validation(
            "Select type SPECIFIC_ATTRIBUTES requires a ProjectionExpression",
        )),
        Some(Select::SpecificAttributes) => Ok(Select::SpecificAttributes),
        Some(other) if has_projection => Err(DynamoDBError::validation(format!(
            "Cannot specify the ProjectionExpression when choosing to get {other:?}"
        ))),
        Some(Select::AllProjectedAttributes) if !on_index => Err(DynamoDBError::validation(
            "ALL_PROJECTED_ATTRIBUTES can be used only when querying an index",
        )),
        Some(other) => Ok(other),
    }
}

fn page_limit(limit: Option<i32>) -> Result<Option<usize>, DynamoDBError> {
    limit
        .map(|l| {
            usize::try_from(l)
                .ok()
                .filter(|l| *l >= 1)
                .ok_or_else(|| {
                    DynamoDBError::validation(format!(
                        "Limit must be greater than or equal to 1, got {l}"
                    ))
                })
        })
        .transpose()
}

fn scan_segment(
    segment: Option<i32>,
    total_segments: Option<i32>,
) -> Result<Option<(u32, u32)>, DynamoDBError> {
    match (segment, total_segments) {
        (None, None) => Ok(None),
        (Some(segment), Some(total)) => {
            let total = u32::try_from(total)
                .ok()
                .filter(|t| (1..=MAX_TOTAL_SEGMENTS).contains(t))
                .ok_or_else(|| {
                    DynamoDBError::validation(format!(
                        "TotalSegments must be between 1 and {MAX_TOTAL_SEGMENTS}, got {total}"
                    ))
                })?;
            let segment = u32::try_from(segment)
                .ok()
                .filter(|s| *s < total)
                .ok_or_else(|| {
                    DynamoDBError::validation(format!(
                        "Segment must be at least 0 and less than TotalSegments ({total}), got {segment}"
                    ))
                })?;
            Ok(Some((segment, total)))
        }
        _ => Err(DynamoDBError::validation(
            "Segment and TotalSegments must be specified together",
        )),
    }
}

fn decode_token(
    shape: &QueryShape<'_>,
    token: Option<&str>,
) -> Result<Option<Position>, DynamoDBError> {
    token
        .map(|t| cursor::decode(shape, t))
        .transpose()
        .map_err(cursor_error_to_dynamodb)
}

fn to_count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

// ---------------------------------------------------------------------------
// Batch & transactions
// ---------------------------------------------------------------------------

impl SyncStackDynamoDB {
    /// Handle `BatchGetItem`. Missing keys are simply absent from the result.
    #[allow(clippy::needless_pass_by_value)]
    pub fn handle_batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, DynamoDBError> {
        let total: usize = input.request_items.values().map(|r| r.keys.len()).sum();
        if total == 0 || total > self.config.max_batch_get_items {
            return Err(DynamoDBError::validation(format!(
                "Too many items requested for the BatchGetItem call: {total} (1-{} allowed)",
                self.config.max_batch_get_items
            )));
        }

        let mut requests: Vec<_> = input.request_items.iter().collect();
        requests.sort_by_key(|(name, _)| name.as_str());
        let mut responses = HashMap::with_capacity(requests.len());
        for (table_name, request) in requests {
            let table = self.state.require_table(table_name)?;
            let names = &request.expression_attribute_names;
            let projection =
                parse_projection_checked(request.projection_expression.as_deref(), names)?;

            let data = table.read();
            let mut seen = HashSet::with_capacity(request.keys.len());
            let mut items = Vec::new();
            for key in &request.keys {
                let key = data.key_from_request(key).map_err(storage_error_to_dynamodb)?;
                if !seen.insert(key.clone()) {
                    return Err(DynamoDBError::validation(
                        "Provided list of item keys contains duplicates",
                    ));
                }
                if let Some(item) = data.get(&key) {
                    items.push(project(item, projection.as_deref(), names)?);
                }
            }
            responses.insert(table_name.clone(), items);
        }
        Ok(BatchGetItemOutput { responses })
    }

    /// Handle `BatchWriteItem`. The whole batch commits atomically.
    #[allow(clippy::needless_pass_by_value)]
    pub fn handle_batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, DynamoDBError> {
        let total: usize = input.request_items.values().map(Vec::len).sum();
        if total == 0 || total > self.config.max_batch_write_items {
            return Err(DynamoDBError::validation(format!(
                "Too many items requested for the BatchWriteItem call: {total} (1-{} allowed)",
                self.config.max_batch_write_items
            )));
        }

        let no_names = HashMap::new();
        let no_values = HashMap::new();
        let mut requests: Vec<_> = input.request_items.iter().collect();
        requests.sort_by_key(|(name, _)| name.as_str());
        let mut writes = Vec::with_capacity(total);
        for (table_name, table_requests) in requests {
            for request in table_requests {
                let (item, action) = match (&request.put_request, &request.delete_request) {
                    (Some(put), None) => {
                        validate_values(put.item.values())?;
                        (&put.item, WriteAction::Put)
                    }
                    (None, Some(delete)) => (&delete.key, WriteAction::Delete),
                    _ => {
                        return Err(DynamoDBError::validation(
                            "A WriteRequest must contain exactly one of PutRequest or DeleteRequest",
                        ));
                    }
                };
                writes.push(PlannedWrite {
                    table_name,
                    item,
                    condition: None,
                    names: &no_names,
                    values: &no_values,
                    action,
                });
            }
        }

        self.apply_atomically(&writes)
            .map_err(AtomicError::into_first_error)?;
        debug!(writes = writes.len(), "batch write committed");
        Ok(BatchWriteItemOutput::default())
    }

    /// Handle `TransactWriteItems`.
    #[allow(clippy::needless_pass_by_value)]
    pub fn handle_transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, DynamoDBError> {
        let count = input.transact_items.len();
        if count == 0 || count > self.config.max_transact_items {
            return Err(DynamoDBError::validation(format!(
                "Member must have length between 1 and {}, got {count}",
                self.config.max_transact_items
            )));
        }

        let writes = input
            .transact_items
            .iter()
            .map(|entry| self.plan_transact_write(entry))
            .collect::<Result<Vec<_>, _>>()?;
        self.apply_atomically(&writes)
            .map_err(AtomicError::into_transaction_error)?;
        debug!(operations = count, "transaction committed");
        Ok(TransactWriteItemsOutput {})
    }

    /// Handle `TransactGetItems`. All tables are read under one snapshot.
    #[allow(clippy::needless_pass_by_value)]
    pub fn handle_transact_get_items(
        &self,
        input: TransactGetItemsInput,
    ) -> Result<TransactGetItemsOutput, DynamoDBError> {
        let count = input.transact_items.len();
        if count == 0 || count > self.config.max_transact_items {
            return Err(DynamoDBError::validation(format!(
                "Member must have length between 1 and {}, got {count}",
                self.config.max_transact_items
            )));
        }

        let projections = input
            .transact_items
            .iter()
            .map(|entry| {
                parse_projection_checked(
                    entry.get.projection_expression.as_deref(),
                    &entry.get.expression_attribute_names,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut tables = BTreeMap::new();
        for entry in &input.transact_items {
            let name = entry.get.table_name.as_str();
            if !tables.contains_key(name) {
                tables.insert(name, self.state.require_table(name)?);
            }
        }
        let guards: BTreeMap<&str, RwLockReadGuard<'_, TableData>> =
            tables.iter().map(|(name, table)| (*name, table.read())).collect();

        let mut responses = Vec::with_capacity(count);
        for (entry, projection) in input.transact_items.iter().zip(&projections) {
            let data = guards
                .get(entry.get.table_name.as_str())
                .ok_or_else(|| DynamoDBError::internal_error("table snapshot missing"))?;
            let key = data
                .key_from_request(&entry.get.key)
                .map_err(storage_error_to_dynamodb)?;
            let item = data
                .get(&key)
                .map(|item| {
                    project(
                        item,
                        projection.as_deref(),
                        &entry.get.expression_attribute_names,
                    )
                })
                .transpose()?;
            responses.push(ItemResponse { item });
        }
        Ok(TransactGetItemsOutput { responses })
    }

    fn plan_transact_write<'r>(
        &self,
        entry: &'r TransactWriteItem,
    ) -> Result<PlannedWrite<'r>, DynamoDBError> {
        match (&entry.condition_check, &entry.put, &entry.delete, &entry.update) {
            (Some(check), None, None, None) => {
                let names = &check.expression_attribute_names;
                let values = &check.expression_attribute_values;
                let (condition, _) = parse_write(Some(check.condition_expression.as_str()), None, names, values)?;
                Ok(PlannedWrite {
                    table_name: &check.table_name,
                    item: &check.key,
                    condition,
                    names,
                    values,
                    action: WriteAction::Check,
                })
            }
            (None, Some(put), None, None) => {
                validate_values(put.item.values())?;
                let names = &put.expression_attribute_names;
                let values = &put.expression_attribute_values;
                let (condition, _) = parse_write(put.condition_expression.as_deref(), None, names, values)?;
                Ok(PlannedWrite {
                    table_name: &put.table_name,
                    item: &put.item,
                    condition,
                    names,
                    values,
                    action: WriteAction::Put,
                })
            }
            (None, None, Some(delete), None) => {
                let names = &delete.expression_attribute_names;
                let values = &delete.expression_attribute_values;
                let (condition, _) = parse_write(delete.condition_expression.as_deref(), None, names, values)?;
                Ok(PlannedWrite {
                    table_name: &delete.table_name,
                    item: &delete.key,
                    condition,
                    names,
                    values,
                    action: WriteAction::Delete,
                })
            }
            (None, None, None, Some(update)) => {
                let names = &update.expression_attribute_names;
                let values = &update.expression_attribute_values;
                let (condition, parsed) = parse_write(
                    update.condition_expression.as_deref(),
                    Some(update.update_expression.as_str()),
                    names,
                    values,
                )?;
                self.updated_attributes(&update.table_name, parsed.as_ref(), names, values)?;
                Ok(PlannedWrite {
                    table_name: &update.table_name,
                    item: &update.key,
                    condition,
                    names,
                    values,
                    action: WriteAction::Update {
                        update: parsed,
                        require_existing: false,
                    },
                })
            }
            _ => Err(DynamoDBError::validation(
                "A TransactWriteItem must contain exactly one of ConditionCheck, Put, Delete or Update",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Atomic write path
// ---------------------------------------------------------------------------

/// One item write, fully parsed, waiting for the table lock.
struct PlannedWrite<'r> {
    table_name: &'r str,
    /// The full item for puts, the request key otherwise.
    item: &'r Item,
    condition: Option<Expr>,
    names: &'r HashMap<String, String>,
    values: &'r HashMap<String, AttributeValue>,
    action: WriteAction,
}

enum WriteAction {
    Put,
    Update {
        update: Option<UpdateExpr>,
        require_existing: bool,
    },
    Delete,
    Check,
}

/// What a write does once its condition passed.
enum Outcome {
    Put(Item),
    Delete,
    Unchanged(Option<Item>),
}

/// Item versions around one committed write.
#[derive(Debug)]
struct Committed {
    old: Option<Item>,
    new: Option<Item>,
}

enum WriteFailure {
    ConditionFailed,
    Rejected(DynamoDBError),
}

impl WriteFailure {
    fn reason(&self) -> CancellationReason {
        match self {
            Self::ConditionFailed => CancellationReason::conditional_check_failed(),
            Self::Rejected(err) if err.code == DynamoDBErrorCode::ItemNotFound => CancellationReason {
                code: Some("ItemNotFound".to_owned()),
                message: Some(err.message.clone()),
            },
            Self::Rejected(err) => CancellationReason::validation_error(err.message.clone()),
        }
    }

    fn into_error(self) -> DynamoDBError {
        match self {
            Self::ConditionFailed => {
                DynamoDBError::conditional_check_failed("The conditional request failed")
            }
            Self::Rejected(err) => err,
        }
    }
}

enum AtomicError {
    /// The request as a whole is invalid; nothing was evaluated.
    Request(DynamoDBError),
    /// At least one write failed; one slot per write, `None` for those that passed.
    Failed(Vec<Option<WriteFailure>>),
}

impl AtomicError {
    fn into_first_error(self) -> DynamoDBError {
        match self {
            Self::Request(err) => err,
            Self::Failed(failures) => failures.into_iter().flatten().next().map_or_else(
                || DynamoDBError::internal_error("write failed without a reason"),
                WriteFailure::into_error,
            ),
        }
    }

    fn into_transaction_error(self) -> DynamoDBError {
        match self {
            Self::Request(err) => err,
            Self::Failed(failures) => DynamoDBError::transaction_canceled(
                failures
                    .iter()
                    .map(|f| f.as_ref().map_or_else(CancellationReason::none, WriteFailure::reason))
                    .collect(),
            ),
        }
    }
}

impl PlannedWrite<'_> {
    fn key_in(&self, data: &TableData) -> Result<PrimaryKey, StorageError> {
        match self.action {
            WriteAction::Put => data.schema().extract(self.item),
            _ => data.key_from_request(self.item),
        }
    }

    /// Evaluates the condition and computes the new item without mutating.
    fn resolve(&self, data: &TableData, key: &PrimaryKey) -> Result<Outcome, WriteFailure> {
        let existing = data.get(key);
        if let Some(condition) = &self.condition {
            let empty = Item::new();
            let ctx = EvalContext {
                item: existing.unwrap_or(&empty),
                names: self.names,
                values: self.values,
            };
            let passed = ctx
                .evaluate(condition)
                .map_err(|e| WriteFailure::Rejected(expression_error_to_dynamodb(e)))?;
            if !passed {
                return Err(WriteFailure::ConditionFailed);
            }
        }

        match &self.action {
            WriteAction::Put => {
                data.validate_put(self.item).map_err(rejected)?;
                Ok(Outcome::Put(self.item.clone()))
            }
            WriteAction::Delete if existing.is_some() => Ok(Outcome::Delete),
            WriteAction::Delete | WriteAction::Check => Ok(Outcome::Unchanged(existing.cloned())),
            WriteAction::Update {
                update,
                require_existing,
            } => {
                if *require_existing && existing.is_none() {
                    return Err(WriteFailure::Rejected(DynamoDBError::item_not_found(
                        "The item to update does not exist",
                    )));
                }
                let base = existing
                    .cloned()
                    .unwrap_or_else(|| data.schema().key_item(self.item));
                let new = match update {
                    Some(update) => EvalContext {
                        item: &base,
                        names: self.names,
                        values: self.values,
                    }
                    .apply_update(update)
                    .map_err(|e| WriteFailure::Rejected(expression_error_to_dynamodb(e)))?,
                    None => base,
                };
                data.validate_put(&new).map_err(rejected)?;
                Ok(Outcome::Put(new))
            }
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn rejected(e: StorageError) -> WriteFailure {
    WriteFailure::Rejected(storage_error_to_dynamodb(e))
}

impl SyncStackDynamoDB {
    fn write_one(&self, write: PlannedWrite<'_>) -> Result<Committed, DynamoDBError> {
        self.apply_atomically(std::slice::from_ref(&write))
            .map_err(AtomicError::into_first_error)?
            .pop()
            .ok_or_else(|| DynamoDBError::internal_error("write produced no result"))
    }

    /// Applies all writes or none of them.
    fn apply_atomically(&self, writes: &[PlannedWrite<'_>]) -> Result<Vec<Committed>, AtomicError> {
        let mut tables = BTreeMap::new();
        for write in writes {
            if !tables.contains_key(write.table_name) {
                let table = self
                    .state
                    .require_table(write.table_name)
                    .map_err(AtomicError::Request)?;
                tables.insert(write.table_name, table);
            }
        }
        // BTreeMap order is name order, so concurrent writers lock consistently.
        let mut guards: BTreeMap<&str, RwLockWriteGuard<'_, TableData>> =
            tables.iter().map(|(name, table)| (*name, table.write())).collect();

        let mut keys = Vec::with_capacity(writes.len());
        let mut seen = HashSet::with_capacity(writes.len());
        for write in writes {
            let data = locked(&guards, write.table_name)?;
            let key = write
                .key_in(data)
                .map_err(|e| AtomicError::Request(storage_error_to_dynamodb(e)))?;
            if !seen.insert((write.table_name, key.clone())) {
                return Err(AtomicError::Request(DynamoDBError::validation(
                    "A request cannot include multiple operations on one item",
                )));
            }
            keys.push(key);
        }

        let mut outcomes = Vec::with_capacity(writes.len());
        let mut failures = Vec::with_capacity(writes.len());
        for (write, key) in writes.iter().zip(&keys) {
            match write.resolve(locked(&guards, write.table_name)?, key) {
                Ok(outcome) => {
                    outcomes.push(outcome);
                    failures.push(None);
                }
                Err(failure) => failures.push(Some(failure)),
            }
        }
        if failures.iter().any(Option::is_some) {
            return Err(AtomicError::Failed(failures));
        }

        let mut committed = Vec::with_capacity(writes.len());
        let mut events = Vec::new();
        for ((write, key), outcome) in writes.iter().zip(keys).zip(outcomes) {
            let data = guards.get_mut(write.table_name).ok_or_else(|| {
                AtomicError::Request(DynamoDBError::internal_error("table lock missing"))
            })?;
            let result = match outcome {
                Outcome::Put(item) => {
                    let old = data
                        .put(item.clone())
                        .map_err(|e| AtomicError::Request(storage_error_to_dynamodb(e)))?;
                    Committed {
                        old,
                        new: Some(item),
                    }
                }
                Outcome::Delete => Committed {
                    old: data.delete(&key),
                    new: None,
                },
                Outcome::Unchanged(item) => {
                    committed.push(Committed {
                        old: item.clone(),
                        new: item,
                    });
                    continue;
                }
            };
            events.push(self.state.record_change(
                write.table_name,
                result.old.clone(),
                result.new.clone(),
            ));
            committed.push(result);
        }
        drop(guards);

        self.state.changes().publish(events);
        Ok(committed)
    }
}

fn locked<'g>(
    guards: &'g BTreeMap<&str, RwLockWriteGuard<'_, TableData>>,
    name: &str,
) -> Result<&'g TableData, AtomicError> {
    guards
        .get(name)
        .map(|guard| &**guard)
        .ok_or_else(|| AtomicError::Request(DynamoDBError::internal_error("table lock missing")))
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Parses the condition and update of one write and checks that the
/// placeholder maps match them exactly.
fn parse_write(
    condition: Option<&str>,
    update: Option<&str>,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<(Option<Expr>, Option<UpdateExpr>), DynamoDBError> {
    let condition = condition
        .map(parse_condition)
        .transpose()
        .map_err(expression_error_to_dynamodb)?;
    let update = update
        .map(parse_update)
        .transpose()
        .map_err(expression_error_to_dynamodb)?;

    let mut placeholders = Placeholders::default();
    if let Some(condition) = &condition {
        placeholders.add_condition(condition);
    }
    if let Some(update) = &update {
        placeholders.add_update(update);
    }
    placeholders
        .verify(names, values)
        .map_err(expression_error_to_dynamodb)?;
    validate_values(values.values())?;
    Ok((condition, update))
}

fn parse_projection_checked(
    text: Option<&str>,
    names: &HashMap<String, String>,
) -> Result<Option<Vec<AttributePath>>, DynamoDBError> {
    let paths = text
        .map(parse_projection)
        .transpose()
        .map_err(expression_error_to_dynamodb)?;
    let mut placeholders = Placeholders::default();
    if let Some(paths) = &paths {
        placeholders.add_projection(paths);
    }
    placeholders
        .verify(names, &HashMap::new())
        .map_err(expression_error_to_dynamodb)?;
    Ok(paths)
}

fn project(
    item: &Item,
    paths: Option<&[AttributePath]>,
    names: &HashMap<String, String>,
) -> Result<Item, DynamoDBError> {
    let Some(paths) = paths else {
        return Ok(item.clone());
    };
    let no_values = HashMap::new();
    EvalContext {
        item,
        names,
        values: &no_values,
    }
    .apply_projection(paths)
    .map_err(expression_error_to_dynamodb)
}

fn retain_attributes(mut item: Item, attributes: &BTreeSet<String>) -> Item {
    item.retain(|name, _| attributes.contains(name));
    item
}

/// Rejects malformed numbers and empty sets anywhere inside the values.
fn validate_values<'v>(
    values: impl IntoIterator<Item = &'v AttributeValue>,
) -> Result<(), DynamoDBError> {
    values.into_iter().try_for_each(validate_value)
}

fn validate_value(value: &AttributeValue) -> Result<(), DynamoDBError> {
    let empty_set = || {
        DynamoDBError::validation(
            "One or more parameter values were invalid: An AttributeValue may not contain an empty set.",
        )
    };
    let bad_number = |n: &str| {
        DynamoDBError::validation(format!(
            "The parameter cannot be converted to a numeric value: {n}"
        ))
    };
    match value {
        AttributeValue::N(n) if !is_valid_number(n) => Err(bad_number(n)),
        AttributeValue::Ns(set) => {
            if set.is_empty() {
                return Err(empty_set());
            }
            set.iter()
                .find(|n| !is_valid_number(n))
                .map_or(Ok(()), |n| Err(bad_number(n)))
        }
        AttributeValue::Ss(set) if set.is_empty() => Err(empty_set()),
        AttributeValue::Bs(set) if set.is_empty() => Err(empty_set()),
        AttributeValue::L(list) => validate_values(list),
        AttributeValue::M(map) => validate_values(map.values()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use syncstack_dynamodb_model::types::{
        AttributeDefinition, ConditionCheck, DeleteRequest, GlobalSecondaryIndex,
        KeySchemaElement, KeysAndAttributes, LocalSecondaryIndex, Projection, ProjectionType,
        PutRequest, ScalarAttributeType, TransactPut, TransactUpdate, WriteRequest,
    };

    use super::*;

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_owned())
    }

    fn n(v: &str) -> AttributeValue {
        AttributeValue::N(v.to_owned())
    }

    fn make_item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
    }

    fn make_values(pairs: &[(&str, AttributeValue)]) -> HashMap<String, AttributeValue> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
    }

    /// Provider with table `items` (`id` HASH) and a GSI `by_status`.
    fn setup_provider() -> SyncStackDynamoDB {
        let provider = SyncStackDynamoDB::new(DynamoDBConfig::default());
        provider
            .handle_create_table(CreateTableInput {
                table_name: "items".to_owned(),
                key_schema: vec![KeySchemaElement::hash("id")],
                attribute_definitions: vec![
                    AttributeDefinition::new("id", ScalarAttributeType::S),
                    AttributeDefinition::new("status", ScalarAttributeType::S),
                ],
                global_secondary_indexes: vec![GlobalSecondaryIndex {
                    index_name: "by_status".to_owned(),
                    key_schema: vec![KeySchemaElement::hash("status")],
                    projection: Projection::default(),
                }],
                local_secondary_indexes: vec![],
            })
            .unwrap();
        provider
    }

    /// Provider with table `events` (`pk` HASH, `sk` N RANGE).
    fn setup_sorted_provider() -> SyncStackDynamoDB {
        let provider = SyncStackDynamoDB::new(DynamoDBConfig::default());
        provider
            .handle_create_table(CreateTableInput {
                table_name: "events".to_owned(),
                key_schema: vec![KeySchemaElement::hash("pk"), KeySchemaElement::range("sk")],
                attribute_definitions: vec![
                    AttributeDefinition::new("pk", ScalarAttributeType::S),
                    AttributeDefinition::new("sk", ScalarAttributeType::N),
                    AttributeDefinition::new("kind", ScalarAttributeType::S),
                ],
                global_secondary_indexes: vec![],
                local_secondary_indexes: vec![LocalSecondaryIndex {
                    index_name: "by_kind".to_owned(),
                    key_schema: vec![KeySchemaElement::hash("pk"), KeySchemaElement::range("kind")],
                    projection: Projection {
                        projection_type: Some(ProjectionType::KeysOnly),
                        non_key_attributes: vec![],
                    },
                }],
            })
            .unwrap();
        provider
    }

    fn put(provider: &SyncStackDynamoDB, table: &str, item: Item) {
        provider
            .handle_put_item(PutItemInput {
                table_name: table.to_owned(),
                item,
                ..Default::default()
            })
            .unwrap();
    }

    fn get(provider: &SyncStackDynamoDB, id: &str) -> Option<Item> {
        provider
            .handle_get_item(GetItemInput {
                table_name: "items".to_owned(),
                key: make_item(&[("id", s(id))]),
                ..Default::default()
            })
            .unwrap()
            .item
    }

    #[test]
    fn test_should_return_empty_result_for_missing_item() {
        let provider = setup_provider();
        assert!(get(&provider, "nope").is_none());
    }

    #[test]
    fn test_should_leave_item_unchanged_when_put_condition_fails() {
        let provider = setup_provider();
        put(&provider, "items", make_item(&[("id", s("1")), ("v", n("1"))]));

        let err = provider
            .handle_put_item(PutItemInput {
                table_name: "items".to_owned(),
                item: make_item(&[("id", s("1")), ("v", n("2"))]),
                condition_expression: Some("attribute_not_exists(id)".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ConditionalCheckFailedException);
        assert_eq!(get(&provider, "1").unwrap()["v"], n("1"));
    }

    #[test]
    fn test_should_return_old_item_on_put() {
        let provider = setup_provider();
        put(&provider, "items", make_item(&[("id", s("1")), ("v", n("1"))]));
        let out = provider
            .handle_put_item(PutItemInput {
                table_name: "items".to_owned(),
                item: make_item(&[("id", s("1")), ("v", n("2"))]),
                return_values: Some(ReturnValue::AllOld),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(out.attributes.unwrap()["v"], n("1"));
    }

    #[test]
    fn test_should_reject_updated_new_on_put() {
        let provider = setup_provider();
        let err = provider
            .handle_put_item(PutItemInput {
                table_name: "items".to_owned(),
                item: make_item(&[("id", s("1"))]),
                return_values: Some(ReturnValue::UpdatedNew),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ValidationException);
    }

    #[test]
    fn test_should_upsert_and_return_updated_attributes() {
        let provider = setup_provider();
        let out = provider
            .handle_update_item(UpdateItemInput {
                table_name: "items".to_owned(),
                key: make_item(&[("id", s("1"))]),
                update_expression: Some("SET #s = :s ADD hits :one".to_owned()),
                expression_attribute_names: HashMap::from([("#s".to_owned(), "status".to_owned())]),
                expression_attribute_values: make_values(&[(":s", s("A")), (":one", n("1"))]),
                return_values: Some(ReturnValue::UpdatedNew),
                ..Default::default()
            })
            .unwrap();
        let attributes = out.attributes.unwrap();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes["hits"], n("1"));
        assert!(!attributes.contains_key("id"));

        let out = provider
            .handle_update_item(UpdateItemInput {
                table_name: "items".to_owned(),
                key: make_item(&[("id", s("1"))]),
                update_expression: Some("ADD hits :one".to_owned()),
                expression_attribute_values: make_values(&[(":one", n("1"))]),
                return_values: Some(ReturnValue::UpdatedOld),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(out.attributes.unwrap()["hits"], n("1"));
        assert_eq!(get(&provider, "1").unwrap()["hits"], n("2"));
    }

    #[test]
    fn test_should_fail_update_of_missing_item_when_existence_required() {
        let provider = setup_provider();
        let err = provider
            .handle_update_item(UpdateItemInput {
                table_name: "items".to_owned(),
                key: make_item(&[("id", s("1"))]),
                update_expression: Some("SET v = :v".to_owned()),
                expression_attribute_values: make_values(&[(":v", n("1"))]),
                require_existing: true,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ItemNotFound);
        assert!(get(&provider, "1").is_none());
    }

    #[test]
    fn test_should_reject_update_of_key_attribute() {
        let provider = setup_provider();
        let err = provider
            .handle_update_item(UpdateItemInput {
                table_name: "items".to_owned(),
                key: make_item(&[("id", s("1"))]),
                update_expression: Some("SET id = :v".to_owned()),
                expression_attribute_values: make_values(&[(":v", s("2"))]),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ValidationException);
    }

    #[test]
    fn test_should_reject_conflicting_update_paths() {
        let provider = setup_provider();
        let err = provider
            .handle_update_item(UpdateItemInput {
                table_name: "items".to_owned(),
                key: make_item(&[("id", s("1"))]),
                update_expression: Some("SET a = :v REMOVE a".to_owned()),
                expression_attribute_values: make_values(&[(":v", s("x"))]),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ConflictingClause);
    }

    #[test]
    fn test_should_delete_with_condition() {
        let provider = setup_provider();
        put(&provider, "items", make_item(&[("id", s("1")), ("status", s("A"))]));
        let err = provider
            .handle_delete_item(DeleteItemInput {
                table_name: "items".to_owned(),
                key: make_item(&[("id", s("1"))]),
                condition_expression: Some("#s = :b".to_owned()),
                expression_attribute_names: HashMap::from([("#s".to_owned(), "status".to_owned())]),
                expression_attribute_values: make_values(&[(":b", s("B"))]),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ConditionalCheckFailedException);

        let out = provider
            .handle_delete_item(DeleteItemInput {
                table_name: "items".to_owned(),
                key: make_item(&[("id", s("1"))]),
                return_values: Some(ReturnValue::AllOld),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(out.attributes.unwrap()["status"], s("A"));
        assert!(get(&provider, "1").is_none());
    }

    #[test]
    fn test_should_query_index_and_follow_updates() {
        let provider = setup_provider();
        for (id, status) in [("1", "A"), ("2", "B"), ("3", "A")] {
            put(&provider, "items", make_item(&[("id", s(id)), ("status", s(status))]));
        }
        let query = || {
            provider
                .handle_query(QueryInput {
                    table_name: "items".to_owned(),
                    index_name: Some("by_status".to_owned()),
                    key_condition_expression: "#s = :a".to_owned(),
                    expression_attribute_names: HashMap::from([(
                        "#s".to_owned(),
                        "status".to_owned(),
                    )]),
                    expression_attribute_values: make_values(&[(":a", s("A"))]),
                    ..Default::default()
                })
                .unwrap()
        };
        let ids: Vec<_> = query().items.iter().map(|i| i["id"].clone()).collect();
        assert_eq!(ids, vec![s("1"), s("3")]);

        put(&provider, "items", make_item(&[("id", s("3")), ("status", s("B"))]));
        let ids: Vec<_> = query().items.iter().map(|i| i["id"].clone()).collect();
        assert_eq!(ids, vec![s("1")]);
    }

    #[test]
    fn test_should_paginate_query_with_filter_to_completion() {
        let provider = setup_sorted_provider();
        for i in 0..10 {
            put(
                &provider,
                "events",
                make_item(&[("pk", s("p")), ("sk", n(&i.to_string())), ("even", AttributeValue::Bool(i % 2 == 0))]),
            );
        }
        let mut token = None;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let out = provider
                .handle_query(QueryInput {
                    table_name: "events".to_owned(),
                    key_condition_expression: "pk = :p AND sk >= :lo".to_owned(),
                    filter_expression: Some("even = :t".to_owned()),
                    expression_attribute_values: make_values(&[
                        (":p", s("p")),
                        (":lo", n("2")),
                        (":t", AttributeValue::Bool(true)),
                    ]),
                    limit: Some(3),
                    scan_index_forward: Some(false),
                    next_token: token.clone(),
                    ..Default::default()
                })
                .unwrap();
            assert!(out.scanned_count <= 3);
            seen.extend(out.items.iter().map(|i| i["sk"].clone()));
            pages += 1;
            token = out.next_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(seen, vec![n("8"), n("6"), n("4"), n("2")]);
        assert_eq!(pages, 3);
    }

    #[test]
    fn test_should_reject_token_from_different_query() {
        let provider = setup_sorted_provider();
        for i in 0..3 {
            put(&provider, "events", make_item(&[("pk", s("p")), ("sk", n(&i.to_string()))]));
        }
        let first = provider
            .handle_query(QueryInput {
                table_name: "events".to_owned(),
                key_condition_expression: "pk = :p".to_owned(),
                expression_attribute_values: make_values(&[(":p", s("p"))]),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        let err = provider
            .handle_query(QueryInput {
                table_name: "events".to_owned(),
                key_condition_expression: "pk = :p".to_owned(),
                expression_attribute_values: make_values(&[(":p", s("p"))]),
                limit: Some(1),
                scan_index_forward: Some(false),
                next_token: first.next_token,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::InvalidCursor);
    }

    #[test]
    fn test_should_count_without_items() {
        let provider = setup_provider();
        for id in ["1", "2", "3"] {
            put(&provider, "items", make_item(&[("id", s(id))]));
        }
        let out = provider
            .handle_scan(ScanInput {
                table_name: "items".to_owned(),
                select: Some(Select::Count),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(out.count, 3);
        assert!(out.items.is_empty());
    }

    #[test]
    fn test_should_cover_table_with_parallel_scan_segments() {
        let provider = setup_provider();
        for i in 0..20 {
            put(&provider, "items", make_item(&[("id", s(&i.to_string()))]));
        }
        let mut ids = BTreeSet::new();
        for segment in 0..4 {
            let out = provider
                .handle_scan(ScanInput {
                    table_name: "items".to_owned(),
                    segment: Some(segment),
                    total_segments: Some(4),
                    ..Default::default()
                })
                .unwrap();
            for item in out.items {
                assert!(ids.insert(item["id"].as_s().unwrap().to_owned()));
            }
        }
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn test_should_fetch_unprojected_attributes_for_local_index() {
        let provider = setup_sorted_provider();
        put(
            &provider,
            "events",
            make_item(&[("pk", s("p")), ("sk", n("1")), ("kind", s("k")), ("body", s("b"))]),
        );
        let query = |select| {
            provider
                .handle_query(QueryInput {
                    table_name: "events".to_owned(),
                    index_name: Some("by_kind".to_owned()),
                    key_condition_expression: "pk = :p".to_owned(),
                    expression_attribute_values: make_values(&[(":p", s("p"))]),
                    select,
                    ..Default::default()
                })
                .unwrap()
        };
        assert!(!query(None).items[0].contains_key("body"));
        assert_eq!(query(Some(Select::AllAttributes)).items[0]["body"], s("b"));
    }

    #[test]
    fn test_should_cancel_transaction_when_one_condition_fails() {
        let provider = setup_provider();
        put(&provider, "items", make_item(&[("id", s("1")), ("v", n("1"))]));

        let err = provider
            .handle_transact_write_items(TransactWriteItemsInput {
                transact_items: vec![
                    TransactWriteItem {
                        put: Some(TransactPut {
                            table_name: "items".to_owned(),
                            item: make_item(&[("id", s("2"))]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    TransactWriteItem {
                        update: Some(TransactUpdate {
                            table_name: "items".to_owned(),
                            key: make_item(&[("id", s("3"))]),
                            update_expression: "SET v = :v".to_owned(),
                            expression_attribute_values: make_values(&[(":v", n("3"))]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    TransactWriteItem {
                        condition_check: Some(ConditionCheck {
                            table_name: "items".to_owned(),
                            key: make_item(&[("id", s("1"))]),
                            condition_expression: "v > :v".to_owned(),
                            expression_attribute_values: make_values(&[(":v", n("5"))]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::TransactionCanceledException);
        let codes: Vec<_> = err
            .cancellation_reasons
            .iter()
            .map(|r| r.code.clone().unwrap())
            .collect();
        assert_eq!(codes, vec!["None", "None", "ConditionalCheckFailed"]);
        assert!(get(&provider, "2").is_none());
        assert!(get(&provider, "3").is_none());
    }

    #[test]
    fn test_should_reject_transaction_touching_one_item_twice() {
        let provider = setup_provider();
        let item = || TransactWriteItem {
            put: Some(TransactPut {
                table_name: "items".to_owned(),
                item: make_item(&[("id", s("1"))]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = provider
            .handle_transact_write_items(TransactWriteItemsInput {
                transact_items: vec![item(), item()],
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ValidationException);
    }

    #[test]
    fn test_should_apply_batch_write_atomically() {
        let provider = setup_provider();
        put(&provider, "items", make_item(&[("id", s("old"))]));

        let write = |item: Item| WriteRequest {
            put_request: Some(PutRequest { item }),
            delete_request: None,
        };
        let err = provider
            .handle_batch_write_item(BatchWriteItemInput {
                request_items: HashMap::from([(
                    "items".to_owned(),
                    vec![
                        write(make_item(&[("id", s("1"))])),
                        write(make_item(&[("id", s("2")), ("status", n("7"))])),
                    ],
                )]),
            })
            .unwrap_err();
        assert_eq!(err.code, DynamoDBErrorCode::ValidationException);
        assert!(get(&provider, "1").is_none());

        provider
            .handle_batch_write_item(BatchWriteItemInput {
                request_items: HashMap::from([(
                    "items".to_owned(),
                    vec![
                        write(make_item(&[("id", s("1"))])),
                        WriteRequest {
                            put_request: None,
                            delete_request: Some(DeleteRequest {
                                key: make_item(&[("id", s("old"))]),
                            }),
                        },
                    ],
                )]),
            })
            .unwrap();
        assert!(get(&provider, "1").is_some());
        assert!(get(&provider, "old").is_none());
    }

    #[test]
    fn test_should_batch_get_with_projection() {
        let provider = setup_provider();
        put(&provider, "items", make_item(&[("id", s("1")), ("a", s("x")), ("b", s("y"))]));
        let out = provider
            .handle_batch_get_item(BatchGetItemInput {
                request_items: HashMap::from([(
                    "items".to_owned(),
                    KeysAndAttributes {
                        keys: vec![make_item(&[("id", s("1"))]), make_item(&[("id", s("2"))])],
                        projection_expression: Some("a".to_owned()),
                        ..Default::default()
                    },
                )]),
            })
            .unwrap();
        let items = &out.responses["items"];
        assert_eq!(items.len(), 1);
        assert_eq!(items[0], make_item(&[("a", s("x"))]));
    }

    #[test]
    fn test_should_page_list_tables() {
        let provider = setup_provider();
        for name in ["alpha", "beta"] {
            provider
                .handle_create_table(CreateTableInput {
                    table_name: name.to_owned(),
                    key_schema: vec![KeySchemaElement::hash("id")],
                    attribute_definitions: vec![AttributeDefinition::new("id", ScalarAttributeType::S)],
                    ..Default::default()
                })
                .unwrap();
        }
        let first = provider
            .handle_list_tables(ListTablesInput {
                exclusive_start_table_name: None,
                limit: Some(2),
            })
            .unwrap();
        assert_eq!(first.table_names, vec!["alpha".to_owned(), "beta".to_owned()]);
        let second = provider
            .handle_list_tables(ListTablesInput {
                exclusive_start_table_name: first.last_evaluated_table_name,
                limit: Some(2),
            })
            .unwrap();
        assert_eq!(second.table_names, vec!["items".to_owned()]);
        assert!(second.last_evaluated_table_name.is_none());
    }

    #[tokio::test]
    async fn test_should_publish_change_events_after_commit() {
        let provider = setup_provider();
        let mut changes = provider.subscribe_changes();
        put(&provider, "items", make_item(&[("id", s("1"))]));
        provider
            .handle_delete_item(DeleteItemInput {
                table_name: "items".to_owned(),
                key: make_item(&[("id", s("1"))]),
                ..Default::default()
            })
            .unwrap();
        // Deleting a missing item emits nothing.
        provider
            .handle_delete_item(DeleteItemInput {
                table_name: "items".to_owned(),
                key: make_item(&[("id", s("1"))]),
                ..Default::default()
            })
            .unwrap();

        let insert = changes.recv().await.unwrap();
        let remove = changes.recv().await.unwrap();
        assert_eq!(insert.event_name(), "INSERT");
        assert_eq!(remove.event_name(), "REMOVE");
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_should_reject_invalid_numbers_and_empty_sets() {
        let provider = setup_provider();
        for value in [n("abc"), AttributeValue::Ss(vec![])] {
            let err = provider
                .handle_put_item(PutItemInput {
                    table_name: "items".to_owned(),
                    item: make_item(&[("id", s("1")), ("x", value)]),
                    ..Default::default()
                })
                .unwrap_err();
            assert_eq!(err.code, DynamoDBErrorCode::ValidationException);
        }
    }
}
