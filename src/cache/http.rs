//! HTTP cache tier (spec.md §4.4 tier 2): PUT/GET of opaque blobs keyed by
//! fingerprint URL. Auth is delegated entirely to the server — this tier
//! adds no credentials of its own, matching "auth is delegated to the HTTP
//! server" in the spec.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::hash::Fingerprint;

use super::{Artifact, CacheError, CacheTier};

pub struct HttpCache {
    client: reqwest::Client,
    base_url: String,
    read_only: bool,
}

impl HttpCache {
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>, read_only: bool) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            client: builder.build().unwrap_or_default(),
            base_url: base_url.into(),
            read_only,
        }
    }

    fn url_for(&self, key: &Fingerprint) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key.to_hex())
    }
}

#[async_trait]
impl CacheTier for HttpCache {
    async fn store(&self, key: &Fingerprint, artifact: &Artifact) -> Result<(), CacheError> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let resp = self
            .client
            .put(self.url_for(key))
            .body(artifact.bytes.clone())
            .send()
            .await
            .map_err(|e| CacheError::Http(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(CacheError::Http(format!("PUT {}: {}", key, resp.status())))
        }
    }

    async fn retrieve(&self, key: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
        let resp = self
            .client
            .get(self.url_for(key))
            .send()
            .await
            .map_err(|e| CacheError::Http(e.to_string()))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = resp.bytes().await.map_err(|e| CacheError::Http(e.to_string()))?;
                Ok(Some(Artifact { bytes: bytes.to_vec() }))
            }
            status => Err(CacheError::Http(format!("GET {}: {}", key, status))),
        }
    }

    async fn clean(&self, key: Option<&Fingerprint>) -> Result<(), CacheError> {
        let Some(key) = key else {
            // The HTTP tier has no bulk-delete endpoint in spec.md's
            // contract; a whole-cache clean is a directory-tier concern.
            return Ok(());
        };
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let resp = self
            .client
            .delete(self.url_for(key))
            .send()
            .await
            .map_err(|e| CacheError::Http(e.to_string()))?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(CacheError::Http(format!("DELETE {}: {}", key, resp.status())))
        }
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_for_joins_base_and_hex() {
        let cache = HttpCache::new("http://cache.internal/v1/", None, false);
        let key = crate::hash::Hasher::new().put_str("x").finalize();
        assert_eq!(cache.url_for(&key), format!("http://cache.internal/v1/{}", key.to_hex()));
    }
}
