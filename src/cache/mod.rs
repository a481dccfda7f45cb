//! Tiered content-addressed cache (spec.md §4.4): a local directory tier,
//! an HTTP tier, and a scriptable shell-out tier, layered in that order.
//! Each tier implements the `CacheTier` trait; `Cache` itself fans
//! `store`/`retrieve`/`clean` out across whichever tiers are configured,
//! matching the teacher's pattern of a thin orchestrating type (`Bash`)
//! over swappable concrete implementations (`FileSystem` impls).

pub mod directory;
pub mod http;
pub mod scripted;

use async_trait::async_trait;
use thiserror::Error;

use crate::hash::Fingerprint;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry for {0} is corrupt, discarding")]
    Corrupt(String),
    #[error("cache is read-only")]
    ReadOnly,
    #[error("http cache error: {0}")]
    Http(String),
    #[error("scripted cache command {command:?} failed: {reason}")]
    ScriptedCommand { command: String, reason: String },
    #[error("archive error: {0}")]
    Archive(String),
}

/// An opaque blob of build/test output, keyed by `Fingerprint`. Kept as raw
/// bytes (a tar stream for multi-file artifacts) rather than a `Vec<(String,
/// Vec<u8>)>` so every tier can treat it uniformly.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn store(&self, key: &Fingerprint, artifact: &Artifact) -> Result<(), CacheError>;
    async fn retrieve(&self, key: &Fingerprint) -> Result<Option<Artifact>, CacheError>;
    async fn clean(&self, key: Option<&Fingerprint>) -> Result<(), CacheError>;
    fn read_only(&self) -> bool {
        false
    }
}

/// The cache interface spec.md §4.4 names: `{Store, Retrieve, Clean}`,
/// fanned out across however many tiers are configured. Retrieval tries
/// tiers in order and stops at the first hit; storing writes to every
/// writable tier (write-through).
pub struct Cache {
    tiers: Vec<Box<dyn CacheTier>>,
}

impl Cache {
    pub fn new(tiers: Vec<Box<dyn CacheTier>>) -> Self {
        Self { tiers }
    }

    pub fn empty() -> Self {
        Self { tiers: Vec::new() }
    }

    #[tracing::instrument(skip(self, artifact), fields(key = %key))]
    pub async fn store(&self, key: &Fingerprint, artifact: &Artifact) -> Result<(), CacheError> {
        for tier in &self.tiers {
            if tier.read_only() {
                continue;
            }
            if let Err(err) = tier.store(key, artifact).await {
                tracing::warn!(%err, "cache tier store failed, continuing with remaining tiers");
            }
        }
        Ok(())
    }

    /// Transactional per spec.md §4.4: a corrupt hit is treated as a miss,
    /// never surfaced as partial data.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn retrieve(&self, key: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
        for tier in &self.tiers {
            match tier.retrieve(key).await {
                Ok(Some(artifact)) => return Ok(Some(artifact)),
                Ok(None) => continue,
                Err(CacheError::Corrupt(_)) => {
                    tracing::warn!(%key, "discarding corrupt cache entry");
                    let _ = tier.clean(Some(key)).await;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(%err, "cache tier retrieve failed, trying next tier");
                    continue;
                }
            }
        }
        Ok(None)
    }

    pub async fn clean(&self, key: Option<&Fingerprint>) -> Result<(), CacheError> {
        for tier in &self.tiers {
            if tier.read_only() {
                continue;
            }
            tier.clean(key).await?;
        }
        Ok(())
    }
}
