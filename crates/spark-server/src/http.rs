use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use reqwest::{Client, Request, Response, StatusCode};
use serde_json::Value;
use spark_config::Config;
use spark_contracts::{ApiResource, Page, SparkError, SparkResult};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::api::{Query, SparkApi};

/// reqwest-backed client for the remote REST API.
pub struct HttpApi {
    client: Client,
    base_url: String,
    token: String,
    retry_after_default: Duration,
}

impl HttpApi {
    pub fn new(
        base_url: &str,
        token: &str,
        timeout: Duration,
        retry_after_default: Duration,
    ) -> SparkResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SparkError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            retry_after_default,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, String> {
        let token = cfg.api.resolve_token().map_err(|e| e.to_string())?;
        Self::new(
            &cfg.api.base_url,
            &token,
            Duration::from_millis(cfg.api.timeout_ms),
            Duration::from_secs(cfg.api.retry_after_default_secs),
        )
        .map_err(|e| e.to_string())
    }

    fn url(&self, resource: ApiResource, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}/{}", self.base_url, resource.path(), id),
            None => format!("{}/{}", self.base_url, resource.path()),
        }
    }

    /// Rate-limit middleware: a 429 is waited out and the request resubmitted,
    /// so callers only ever see the final answer.
    async fn execute(&self, request: Request) -> SparkResult<Response> {
        loop {
            let attempt = request.try_clone().ok_or_else(|| {
                SparkError::Transport("request body cannot be replayed".to_string())
            })?;
            let response = self
                .client
                .execute(attempt)
                .await
                .map_err(|e| SparkError::Transport(e.to_string()))?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }
            let wait = retry_after(response.headers()).unwrap_or(self.retry_after_default);
            warn!(
                url = %request.url(),
                wait_secs = wait.as_secs(),
                "rate limited by remote api, retrying"
            );
            sleep(wait).await;
        }
    }

    async fn send(&self, request: Request) -> SparkResult<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        let response = self.execute(request).await?;
        let status = response.status();
        debug!(%method, %url, status = status.as_u16(), "remote api call");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SparkError::from_status(status.as_u16(), body))
    }

    async fn send_json(&self, request: Request) -> SparkResult<Value> {
        let response = self.send(request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let text = response
            .text()
            .await
            .map_err(|e| SparkError::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| SparkError::Decode(e.to_string()))
    }

    fn build(&self, builder: reqwest::RequestBuilder) -> SparkResult<Request> {
        builder
            .bearer_auth(&self.token)
            .build()
            .map_err(|e| SparkError::Transport(e.to_string()))
    }
}

#[async_trait]
impl SparkApi for HttpApi {
    async fn list(&self, resource: ApiResource, query: Query<'_>) -> SparkResult<Vec<Value>> {
        let mut request = self.build(self.client.get(self.url(resource, None)).query(query))?;
        let mut items = Vec::new();
        let mut pages = 0usize;
        loop {
            let response = self.send(request).await?;
            let next = next_link(response.headers());
            let page: Page = response
                .json()
                .await
                .map_err(|e| SparkError::Decode(e.to_string()))?;
            pages += 1;
            items.extend(page.items);
            match next {
                Some(url) => request = self.build(self.client.get(url))?,
                None => break,
            }
        }
        debug!(resource = resource.path(), pages, items = items.len(), "listed");
        Ok(items)
    }

    async fn get(&self, resource: ApiResource, id: &str) -> SparkResult<Value> {
        let request = self.build(self.client.get(self.url(resource, Some(id))))?;
        match self.send_json(request).await? {
            Value::Null => Err(SparkError::NotFound(format!("{}/{id}", resource.path()))),
            value => Ok(value),
        }
    }

    async fn create(&self, resource: ApiResource, payload: Value) -> SparkResult<Value> {
        let request = self.build(self.client.post(self.url(resource, None)).json(&payload))?;
        self.send_json(request).await
    }

    async fn update(&self, resource: ApiResource, id: &str, payload: Value) -> SparkResult<Value> {
        let request = self.build(self.client.put(self.url(resource, Some(id))).json(&payload))?;
        self.send_json(request).await
    }

    async fn delete(&self, resource: ApiResource, id: &str) -> SparkResult<()> {
        let request = self.build(self.client.delete(self.url(resource, Some(id))))?;
        self.send(request).await.map(|_| ())
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(parse_next_link)
}

/// Extracts the `rel="next"` target from an RFC 8288 `Link` header value.
pub(crate) fn parse_next_link(value: &str) -> Option<String> {
    value.split(',').find_map(|link| {
        let mut parts = link.split(';');
        let target = parts.next()?.trim();
        let url = target.strip_prefix('<')?.strip_suffix('>')?;
        let is_next = parts.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        is_next.then(|| url.to_string())
    })
}
