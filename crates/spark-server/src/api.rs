use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use spark_contracts::{ApiResource, SparkError, SparkResult};

/// Query parameters of a list call, e.g. `[("roomId", "...")]`.
pub type Query<'a> = &'a [(&'a str, &'a str)];

/// Remote resource client. `list` returns every page, concatenated in page order.
#[async_trait]
pub trait SparkApi: Send + Sync {
    async fn list(&self, resource: ApiResource, query: Query<'_>) -> SparkResult<Vec<Value>>;
    async fn get(&self, resource: ApiResource, id: &str) -> SparkResult<Value>;
    async fn create(&self, resource: ApiResource, payload: Value) -> SparkResult<Value>;
    async fn update(&self, resource: ApiResource, id: &str, payload: Value) -> SparkResult<Value>;
    async fn delete(&self, resource: ApiResource, id: &str) -> SparkResult<()>;
}

pub fn decode<T: DeserializeOwned>(value: Value) -> SparkResult<T> {
    serde_json::from_value(value).map_err(|e| SparkError::Decode(e.to_string()))
}

pub fn encode<T: Serialize>(value: &T) -> SparkResult<Value> {
    serde_json::to_value(value).map_err(|e| SparkError::Decode(e.to_string()))
}
