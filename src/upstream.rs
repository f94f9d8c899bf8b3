use std::{fmt, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::models::Shape;

/// Named JSON documents published by the upstream data host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Matrix(Shape),
    Index,
    Depth,
}

impl Resource {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Matrix(Shape::Round) => "matrix.json",
            Self::Matrix(Shape::Cushion) => "matrix_cushion.json",
            Self::Index => "index.json",
            Self::Depth => "depth.json",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Request for {resource} failed: {source}")]
    Transport {
        resource: Resource,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} from {resource}")]
    Status { resource: Resource, status: u16 },
    #[error("Failed to decode {resource}: {detail}")]
    Decode { resource: Resource, detail: String },
}

#[async_trait]
pub trait DatasetProvider: Send + Sync {
    async fn fetch(&self, resource: Resource) -> Result<Value, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("diamond-pricing-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build upstream HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, resource: Resource) -> String {
        format!("{}/{}", self.base_url, resource.path())
    }
}

#[async_trait]
impl DatasetProvider for HttpProvider {
    async fn fetch(&self, resource: Resource) -> Result<Value, UpstreamError> {
        let url = self.url_for(resource);
        debug!(%url, "Fetching upstream dataset");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| UpstreamError::Transport { resource, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                resource,
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| UpstreamError::Decode {
                resource,
                detail: err.to_string(),
            })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use serde_json::json;

    use super::*;

    /// In-memory provider serving fixed documents and counting fetches.
    #[derive(Debug, Default)]
    pub struct StaticProvider {
        documents: HashMap<Resource, Value>,
        fetches: AtomicUsize,
    }

    impl StaticProvider {
        pub fn with(mut self, resource: Resource, document: Value) -> Self {
            self.documents.insert(resource, document);
            self
        }

        pub fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DatasetProvider for StaticProvider {
        async fn fetch(&self, resource: Resource) -> Result<Value, UpstreamError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.documents
                .get(&resource)
                .cloned()
                .ok_or(UpstreamError::Status {
                    resource,
                    status: 404,
                })
        }
    }

    pub fn sample_provider() -> StaticProvider {
        StaticProvider::default()
            .with(
                Resource::Matrix(Shape::Round),
                json!({
                    "r": ["D", "E"],
                    "c": ["FL", "IF"],
                    "l": {
                        "0.3": [6.0, 6.1, 6.2, 6.3],
                        "0.4": [6.4, 6.5, 6.6, 6.7]
                    },
                    "s": [2, 2]
                }),
            )
            .with(
                Resource::Index,
                json!({
                    "dcx": 5123.45,
                    "trend": 1.25,
                    "ts": 1_700_000_000_000_i64,
                    "specs": [
                        {"carat": 1.0, "color": "D", "clarity": "IF", "per_carat": 5000},
                        {"carat": 1.5, "color": "E", "clarity": "FL", "per_carat": 5100}
                    ]
                }),
            )
            .with(
                Resource::Depth,
                json!({
                    "ts": 1_700_000_000_000_i64,
                    "clarity": {"1.0": {"IF": 10, "VVS1": 20}},
                    "color": {"1.0": {"D": 15, "E": 25}},
                    "colclar": {"D/IF": 12, "E/VVS1": 18}
                }),
            )
    }
}
