use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use spark_contracts::{ApiResource, SparkError, SparkResult};
use tokio::time::sleep;

use crate::api::{Query, SparkApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOp {
    List,
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<ApiResource, Vec<Value>>,
    next_id: u64,
    conflicts: HashSet<ApiResource>,
    unavailable: HashSet<ApiResource>,
    calls: HashMap<(ApiOp, ApiResource), usize>,
}

/// In-process stand-in for the remote API. Counts every call so callers can
/// assert how many round trips an operation cost.
#[derive(Default)]
pub struct MemoryApi {
    state: Mutex<MemoryState>,
    get_delay: Mutex<Duration>,
    list_delay: Mutex<Duration>,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, resource: ApiResource, record: Value) {
        let mut state = self.state.lock();
        state.collections.entry(resource).or_default().push(record);
    }

    pub fn remove(&self, resource: ApiResource, id: &str) {
        let mut state = self.state.lock();
        if let Some(items) = state.collections.get_mut(&resource) {
            items.retain(|item| item_id(item) != Some(id));
        }
    }

    pub fn records(&self, resource: ApiResource) -> Vec<Value> {
        let state = self.state.lock();
        state.collections.get(&resource).cloned().unwrap_or_default()
    }

    /// Every create/update/delete on `resource` answers 409 from now on.
    pub fn conflict_on(&self, resource: ApiResource) {
        self.state.lock().conflicts.insert(resource);
    }

    /// Holds each `get` for `delay` before answering.
    pub fn set_get_delay(&self, delay: Duration) {
        *self.get_delay.lock() = delay;
    }

    /// Holds each `list` for `delay` before answering.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock() = delay;
    }

    /// Every `list` on `resource` answers 503 from now on.
    pub fn fail_lists(&self, resource: ApiResource) {
        self.state.lock().unavailable.insert(resource);
    }

    pub fn calls(&self, op: ApiOp, resource: ApiResource) -> usize {
        let state = self.state.lock();
        state.calls.get(&(op, resource)).copied().unwrap_or(0)
    }

    fn record_call(&self, op: ApiOp, resource: ApiResource) -> SparkResult<()> {
        let mut state = self.state.lock();
        *state.calls.entry((op, resource)).or_default() += 1;
        if op != ApiOp::List && op != ApiOp::Get && state.conflicts.contains(&resource) {
            return Err(SparkError::Conflict {
                body: format!("{} is locked", resource.path()),
            });
        }
        Ok(())
    }
}

fn item_id(item: &Value) -> Option<&str> {
    item.get("id").and_then(|v| v.as_str())
}

/// `people?email=` matches against the record's `emails` array.
fn query_field(resource: ApiResource, key: &str) -> &str {
    match (resource, key) {
        (ApiResource::People, "email") => "emails",
        _ => key,
    }
}

fn matches_query(resource: ApiResource, item: &Value, query: Query<'_>) -> bool {
    query.iter().all(|(key, value)| match item.get(query_field(resource, key)) {
        Some(Value::String(s)) => s == *value,
        Some(Value::Array(values)) => values.iter().any(|v| v.as_str() == Some(*value)),
        _ => false,
    })
}

#[async_trait]
impl SparkApi for MemoryApi {
    async fn list(&self, resource: ApiResource, query: Query<'_>) -> SparkResult<Vec<Value>> {
        self.record_call(ApiOp::List, resource)?;
        let delay = *self.list_delay.lock();
        if delay > Duration::ZERO {
            sleep(delay).await;
        }
        let state = self.state.lock();
        if state.unavailable.contains(&resource) {
            return Err(SparkError::Api {
                status: 503,
                body: format!("{} unavailable", resource.path()),
            });
        }
        Ok(state
            .collections
            .get(&resource)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| matches_query(resource, item, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, resource: ApiResource, id: &str) -> SparkResult<Value> {
        self.record_call(ApiOp::Get, resource)?;
        let delay = *self.get_delay.lock();
        if delay > Duration::ZERO {
            sleep(delay).await;
        }
        let state = self.state.lock();
        state
            .collections
            .get(&resource)
            .and_then(|items| items.iter().find(|item| item_id(item) == Some(id)))
            .cloned()
            .ok_or_else(|| SparkError::NotFound(format!("{}/{id}", resource.path())))
    }

    async fn create(&self, resource: ApiResource, mut payload: Value) -> SparkResult<Value> {
        self.record_call(ApiOp::Create, resource)?;
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("{}-{}", resource.path(), state.next_id);
        if let Some(obj) = payload.as_object_mut() {
            obj.entry("id").or_insert(Value::String(id));
        }
        state
            .collections
            .entry(resource)
            .or_default()
            .push(payload.clone());
        Ok(payload)
    }

    async fn update(&self, resource: ApiResource, id: &str, payload: Value) -> SparkResult<Value> {
        self.record_call(ApiOp::Update, resource)?;
        let mut state = self.state.lock();
        let item = state
            .collections
            .get_mut(&resource)
            .and_then(|items| items.iter_mut().find(|item| item_id(item) == Some(id)))
            .ok_or_else(|| SparkError::NotFound(format!("{}/{id}", resource.path())))?;
        if let (Some(target), Some(patch)) = (item.as_object_mut(), payload.as_object()) {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(item.clone())
    }

    async fn delete(&self, resource: ApiResource, id: &str) -> SparkResult<()> {
        self.record_call(ApiOp::Delete, resource)?;
        let mut state = self.state.lock();
        let items = state.collections.entry(resource).or_default();
        let before = items.len();
        items.retain(|item| item_id(item) != Some(id));
        if items.len() == before {
            return Err(SparkError::NotFound(format!("{}/{id}", resource.path())));
        }
        Ok(())
    }
}
