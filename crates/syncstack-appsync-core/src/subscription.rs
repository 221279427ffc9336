//! Subscription Broker.
//!
//! Subscriptions are bound to mutation fields by the definition. After a
//! mutation resolves, its payload is offered to every registration of the
//! bound subscription fields. Arguments given when subscribing must equal the
//! payload's attributes of the same name, and the optional filter expression
//! must hold. Delivery is a `try_send` on the registration's channel: a full
//! or closed channel never blocks other registrations.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde_json::{Map, Value};
use syncstack_appsync_model::{AppSyncError, Selection, SubscriptionDefinition, SubscriptionFilter};
use syncstack_dynamodb_core::expression;
use syncstack_dynamodb_model::{AttributeValue, Item, attribute_value::item_from_json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A payload delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEvent {
    /// Registration that matched.
    pub subscription_id: u64,
    /// `{responseKey: payload}` projected to the subscription's selections.
    pub data: Value,
}

/// Receiving end of one registration.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<SubscriptionEvent>,
}

impl Subscription {
    /// Registration id, for [`SubscriptionBroker::unsubscribe`].
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the registration is removed.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.receiver.recv().await
    }

    /// Take an already delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<SubscriptionEvent> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug)]
struct Registration {
    connection_id: String,
    selection: Selection,
    arguments: Map<String, Value>,
    filter: Option<CompiledFilter>,
    sender: mpsc::Sender<SubscriptionEvent>,
}

#[derive(Debug)]
struct CompiledFilter {
    expression: String,
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl CompiledFilter {
    fn matches(&self, item: &Item) -> Result<bool, expression::ExpressionError> {
        expression::evaluate(&self.expression, &self.names, &self.values, item)
    }
}

/// Registry of live subscriptions.
#[derive(Debug)]
pub struct SubscriptionBroker {
    triggers: HashMap<String, Vec<String>>,
    fields: Vec<String>,
    registrations: DashMap<u64, Registration>,
    next_id: AtomicU64,
    buffer: usize,
}

impl SubscriptionBroker {
    /// Build from the definition's subscription bindings. `buffer` is the
    /// channel capacity of each registration.
    #[must_use]
    pub fn new(definitions: &[SubscriptionDefinition], buffer: usize) -> Self {
        let mut triggers: HashMap<String, Vec<String>> = HashMap::new();
        for def in definitions {
            for mutation in &def.mutations {
                triggers
                    .entry(mutation.clone())
                    .or_default()
                    .push(def.field_name.clone());
            }
        }
        Self {
            triggers,
            fields: definitions.iter().map(|d| d.field_name.clone()).collect(),
            registrations: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register `selection` (a root subscription field) for `connection_id`.
    ///
    /// # Errors
    ///
    /// `BadRequestException` for an undeclared subscription field or a filter
    /// expression that does not parse.
    pub fn subscribe(
        &self,
        connection_id: &str,
        selection: &Selection,
        arguments: Map<String, Value>,
        filter: Option<SubscriptionFilter>,
    ) -> Result<Subscription, AppSyncError> {
        if !self.fields.iter().any(|f| f == &selection.name) {
            return Err(AppSyncError::bad_request(format!(
                "'{}' is not a subscription field",
                selection.name
            )));
        }
        let filter = filter.map(compile_filter).transpose()?;
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registrations.insert(
            id,
            Registration {
                connection_id: connection_id.to_owned(),
                selection: selection.clone(),
                arguments,
                filter,
                sender,
            },
        );
        debug!(id, field = %selection.name, connection = %connection_id, "subscription registered");
        Ok(Subscription { id, receiver })
    }

    /// Remove one registration. Returns whether it existed.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.registrations.remove(&id).is_some()
    }

    /// Remove every registration of a connection. Returns how many were removed.
    pub fn disconnect(&self, connection_id: &str) -> usize {
        let before = self.registrations.len();
        self.registrations
            .retain(|_, registration| registration.connection_id != connection_id);
        before.saturating_sub(self.registrations.len())
    }

    /// Live registrations.
    #[must_use]
    pub fn active(&self) -> usize {
        self.registrations.len()
    }

    /// Whether any subscription is bound to `mutation_field`.
    #[must_use]
    pub fn is_trigger(&self, mutation_field: &str) -> bool {
        self.triggers.contains_key(mutation_field)
    }

    /// Offer a mutation's resolved payload to matching registrations.
    /// Returns the number of deliveries.
    pub fn publish(&self, mutation_field: &str, payload: &Value) -> usize {
        let Some(fields) = self.triggers.get(mutation_field) else {
            return 0;
        };
        let item = item_from_json(payload).unwrap_or_default();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in &self.registrations {
            let registration = entry.value();
            if !fields.contains(&registration.selection.name) {
                continue;
            }
            if !arguments_match(&registration.arguments, payload) {
                continue;
            }
            if let Some(filter) = &registration.filter {
                match filter.matches(&item) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(id = *entry.key(), error = %e, "subscription filter failed");
                        continue;
                    }
                }
            }

            let mut data = Map::new();
            data.insert(
                registration.selection.response_key().to_owned(),
                project(payload, &registration.selection.selections),
            );
            let event = SubscriptionEvent {
                subscription_id: *entry.key(),
                data: Value::Object(data),
            };
            match registration.sender.try_send(event) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(id = *entry.key(), connection = %registration.connection_id, "subscriber buffer full, payload dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in closed {
            self.registrations.remove(&id);
            debug!(id, "subscription receiver dropped, registration removed");
        }
        debug!(mutation = %mutation_field, delivered, "published mutation payload");
        delivered
    }
}

fn compile_filter(filter: SubscriptionFilter) -> Result<CompiledFilter, AppSyncError> {
    let compiled = CompiledFilter {
        values: filter
            .expression_values
            .iter()
            .map(|(k, v)| (k.clone(), AttributeValue::from_json(v)))
            .collect(),
        names: filter.expression_names,
        expression: filter.expression,
    };
    compiled
        .matches(&Item::default())
        .map_err(|e| AppSyncError::bad_request(format!("Invalid subscription filter: {e}")))?;
    Ok(compiled)
}

fn arguments_match(arguments: &Map<String, Value>, payload: &Value) -> bool {
    arguments
        .iter()
        .filter(|(_, expected)| !expected.is_null())
        .all(|(name, expected)| payload.get(name) == Some(expected))
}

/// Project `value` onto a selection set. Lists are projected element-wise;
/// an empty selection set keeps the value whole.
#[must_use]
pub fn project(value: &Value, selections: &[Selection]) -> Value {
    if selections.is_empty() {
        return value.clone();
    }
    match value {
        Value::Array(items) => items.iter().map(|v| project(v, selections)).collect(),
        Value::Object(map) => Value::Object(
            selections
                .iter()
                .map(|selection| {
                    let field = if selection.name == "__typename" {
                        selection.return_type.clone().map_or(Value::Null, Value::String)
                    } else {
                        map.get(&selection.name)
                            .map_or(Value::Null, |v| project(v, &selection.selections))
                    };
                    (selection.response_key().to_owned(), field)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}
