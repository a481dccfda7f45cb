//! Scriptable cache tier (spec.md §4.4 tier 3): shells out to a configured
//! `RetrieveCommand`/`StoreCommand` with `CACHE_KEY` set in the
//! environment; stdin/stdout carry a tarball of the artifact.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::hash::Fingerprint;

use super::{Artifact, CacheError, CacheTier};

pub struct ScriptedCache {
    retrieve_command: Option<String>,
    store_command: Option<String>,
}

impl ScriptedCache {
    pub fn new(retrieve_command: Option<String>, store_command: Option<String>) -> Self {
        Self {
            retrieve_command,
            store_command,
        }
    }

    async fn run(&self, command: &str, key: &Fingerprint, stdin_data: Option<&[u8]>) -> Result<Vec<u8>, CacheError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("CACHE_KEY", key.to_hex())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CacheError::ScriptedCommand {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(data) = stdin_data {
            let mut stdin = child.stdin.take().expect("piped stdin");
            stdin.write_all(data).await.map_err(CacheError::Io)?;
            drop(stdin);
        } else {
            drop(child.stdin.take());
        }

        let mut stdout = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout).await.map_err(CacheError::Io)?;
        }

        let status = child.wait().await.map_err(CacheError::Io)?;
        if !status.success() {
            return Err(CacheError::ScriptedCommand {
                command: command.to_string(),
                reason: format!("exited with {status}"),
            });
        }
        Ok(stdout)
    }

    /// Packs the artifact's bytes into a single-entry POSIX ustar archive
    /// with a zeroed mtime, the deterministic tarball format this tier's
    /// Open Question was resolved in favor of (see `DESIGN.md`).
    fn pack(artifact: &Artifact) -> Result<Vec<u8>, CacheError> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_size(artifact.bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder
            .append_data(&mut header, "artifact.bin", artifact.bytes.as_slice())
            .map_err(|e| CacheError::Archive(e.to_string()))?;
        builder.into_inner().map_err(|e| CacheError::Archive(e.to_string()))
    }

    fn unpack(bytes: &[u8]) -> Result<Artifact, CacheError> {
        let mut archive = tar::Archive::new(bytes);
        let mut entries = archive.entries().map_err(|e| CacheError::Archive(e.to_string()))?;
        let mut entry = entries
            .next()
            .ok_or_else(|| CacheError::Archive("empty tarball".to_string()))?
            .map_err(|e| CacheError::Archive(e.to_string()))?;
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut out).map_err(CacheError::Io)?;
        Ok(Artifact { bytes: out })
    }
}

#[async_trait]
impl CacheTier for ScriptedCache {
    async fn store(&self, key: &Fingerprint, artifact: &Artifact) -> Result<(), CacheError> {
        let Some(command) = &self.store_command else {
            return Ok(());
        };
        let tarball = Self::pack(artifact)?;
        self.run(command, key, Some(&tarball)).await?;
        Ok(())
    }

    async fn retrieve(&self, key: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
        let Some(command) = &self.retrieve_command else {
            return Ok(None);
        };
        match self.run(command, key, None).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Self::unpack(&bytes)
                .map(Some)
                .map_err(|_| CacheError::Corrupt(key.to_hex())),
            Err(CacheError::ScriptedCommand { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn clean(&self, _key: Option<&Fingerprint>) -> Result<(), CacheError> {
        // No generic "clean" hook in the RetrieveCommand/StoreCommand
        // contract; scripted backends manage their own retention.
        Ok(())
    }

    fn read_only(&self) -> bool {
        self.store_command.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_unpack_round_trips() {
        let artifact = Artifact { bytes: b"payload".to_vec() };
        let packed = ScriptedCache::pack(&artifact).unwrap();
        let unpacked = ScriptedCache::unpack(&packed).unwrap();
        assert_eq!(unpacked.bytes, b"payload");
    }

    #[tokio::test]
    async fn retrieve_without_command_configured_is_none() {
        let cache = ScriptedCache::new(None, None);
        let key = crate::hash::Hasher::new().put_str("k").finalize();
        assert!(cache.retrieve(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_and_retrieve_round_trip_via_shell_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.tar");
        let store_cmd = format!("cat > {}", path.display());
        let retrieve_cmd = format!("cat {}", path.display());
        let cache = ScriptedCache::new(Some(retrieve_cmd), Some(store_cmd));
        let key = crate::hash::Hasher::new().put_str("k").finalize();
        let artifact = Artifact { bytes: b"abc".to_vec() };
        cache.store(&key, &artifact).await.unwrap();
        let got = cache.retrieve(&key).await.unwrap().unwrap();
        assert_eq!(got.bytes, b"abc");
    }
}
