/// HTTP client for the Ergo node: pooled `reqwest::Client`, retry with
/// exponential backoff, and an optional response cache keyed by
/// endpoint+args.
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::metrics::NODE_REQUEST_DURATION;
use crate::node::cache::NodeCache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "fullHeight")]
    pub full_height: i64,
    #[serde(rename = "headersHeight")]
    pub headers_height: i64,
    pub version: Option<String>,
    #[serde(rename = "isMining")]
    pub is_mining: Option<bool>,
    #[serde(rename = "peersCount")]
    pub peers_count: Option<i64>,
    #[serde(rename = "unconfirmedCount")]
    pub unconfirmed_count: Option<i64>,
}

/// Raw node block payload. `height` is not present in the node's own
/// response and is attached by the caller after fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBlock {
    pub header: Json,
    #[serde(rename = "blockTransactions")]
    pub block_transactions: Json,
    #[serde(default)]
    pub height: Option<i64>,
}

pub struct NodeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
    cache: NodeCache,
    max_concurrency: usize,
}

impl NodeClient {
    pub fn new(config: &NodeConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.max_connections)
            .build()
            .expect("failed to build node HTTP client");

        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retries: config.retries,
            cache: NodeCache::new(4096, config.cache_ttl_secs),
            max_concurrency: config.max_connections.min(20),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Performs a GET with retry (exponential backoff, base 1s, factor 2,
    /// capped at `self.retries` attempts) and an optional cache lookup.
    async fn get_json<T: DeserializeOwned + Serialize>(
        &self,
        path: &str,
        cache_key: Option<&str>,
    ) -> Result<T, NodeError> {
        if let Some(key) = cache_key {
            if let Some(cached) = self.cache.get::<T>(key).await {
                return Ok(cached);
            }
        }

        let mut attempt = 0;
        let mut backoff = Duration::from_secs(1);
        loop {
            attempt += 1;
            let start = Instant::now();
            let mut request = self.http.get(self.url(path));
            if let Some(ref key) = self.api_key {
                request = request.header("api_key", key.clone());
            }

            let outcome = request.send().await;
            NODE_REQUEST_DURATION
                .with_label_values(&[path])
                .observe(start.elapsed().as_secs_f64());

            match outcome {
                Ok(response) if response.status().is_success() => {
                    let text = response
                        .text()
                        .await
                        .map_err(|e| NodeError::Malformed(e.to_string()))?;
                    let value: T = serde_json::from_str(&text)
                        .map_err(|e| NodeError::Malformed(format!("{path}: {e}")))?;
                    if let Some(key) = cache_key {
                        self.cache.put(key, &value).await;
                    }
                    return Ok(value);
                }
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Err(NodeError::NotFound);
                }
                Ok(response) => {
                    let status = response.status();
                    if attempt >= self.retries {
                        return Err(NodeError::Unavailable(format!(
                            "{path} returned {status} after {attempt} attempts"
                        )));
                    }
                }
                Err(e) => {
                    warn!(path, attempt, error = %e, "node request failed");
                    if attempt >= self.retries {
                        return Err(NodeError::Unavailable(e.to_string()));
                    }
                }
            }

            debug!(path, attempt, backoff_ms = backoff.as_millis(), "retrying node request");
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    pub async fn get_info(&self) -> Result<NodeInfo, NodeError> {
        self.get_json("/info", Some("info")).await
    }

    pub async fn get_current_height(&self) -> Result<i64, NodeError> {
        Ok(self.get_info().await?.full_height)
    }

    pub async fn get_block_ids_at_height(&self, height: i64) -> Result<Vec<String>, NodeError> {
        self.get_json(
            &format!("/blocks/at/{height}"),
            Some(&format!("blocks_at_{height}")),
        )
        .await
    }

    pub async fn get_block(&self, block_id: &str) -> Result<RawBlock, NodeError> {
        self.get_json(
            &format!("/blocks/{block_id}"),
            Some(&format!("block_{block_id}")),
        )
        .await
    }

    /// Fetches the block at `height` and attaches `height` to the
    /// payload, since the node's own response omits it.
    pub async fn get_block_by_height(&self, height: i64) -> Result<RawBlock, NodeError> {
        let ids = self.get_block_ids_at_height(height).await?;
        let block_id = ids.first().ok_or(NodeError::NotFound)?;
        let mut block = self.get_block(block_id).await?;
        block.height = Some(height);
        Ok(block)
    }

    /// Bounded fan-out over `[from, to]`, each height retried independently,
    /// returning successfully-fetched blocks sorted ascending by height.
    /// Heights that error after retry exhaustion are omitted, not panicked on
    /// — the caller (the fetcher pool) decides how to react to gaps.
    pub async fn get_blocks_in_range(
        &self,
        from: i64,
        to: i64,
    ) -> Result<Vec<RawBlock>, NodeError> {
        if from > to {
            return Err(NodeError::Malformed(format!(
                "range start {from} > end {to}"
            )));
        }
        let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(self.max_concurrency));
        let tasks = (from..=to).map(|height| {
            let sem = semaphore.clone();
            async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                self.get_block_by_height(height).await
            }
        });
        let results = futures::future::join_all(tasks).await;

        let mut blocks = Vec::with_capacity(results.len());
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(block) => blocks.push(block),
                Err(e) => warn!(height = from + i as i64, error = %e, "failed to fetch block in range"),
            }
        }
        blocks.sort_by_key(|b| b.height.unwrap_or(0));
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> NodeClient {
        NodeClient::new(&NodeConfig {
            url: "http://127.0.0.1:9053/".to_string(),
            api_key: None,
            timeout_secs: 5,
            max_connections: 4,
            retries: 1,
            cache_ttl_secs: 60,
        })
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let client = test_client();
        assert_eq!(client.url("/info"), "http://127.0.0.1:9053/info");
    }

    #[tokio::test]
    async fn get_blocks_in_range_rejects_inverted_range() {
        let client = test_client();
        let err = client.get_blocks_in_range(10, 5).await.unwrap_err();
        assert!(matches!(err, NodeError::Malformed(_)));
    }
}
