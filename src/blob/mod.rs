//! Display handles for in-memory image payloads.
//!
//! Callers never hold cached bytes directly: they receive a short opaque
//! handle (`blob:<uuid>`) that stays valid until it is revoked. Revoking is
//! the caller's job once the image is no longer displayed; `revoke_all`
//! exists for page teardown.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::error::{CacheError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const HANDLE_SCHEME: &str = "blob:";

/// Opaque, locally valid reference to a payload held by a [`BlobRegistry`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobHandle(String);

impl BlobHandle {
    fn mint() -> Self {
        Self(format!("{}{}", HANDLE_SCHEME, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlobHandle").field(&self.0).finish()
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A payload together with its content type.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub bytes: Bytes,
    pub mime: String,
}

/// Owns every live payload handed out as a handle.
///
/// Cheap to clone; clones share the same handle table.
#[derive(Debug, Clone, Default)]
pub struct BlobRegistry {
    blobs: Arc<RwLock<HashMap<BlobHandle, Blob>>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `bytes` and return a fresh handle for them.
    pub fn mint(&self, bytes: Bytes, mime: impl Into<String>) -> Result<BlobHandle> {
        if bytes.is_empty() {
            return Err(CacheError::BlobMint("refusing to mint a handle for an empty payload".into()));
        }

        let handle = BlobHandle::mint();
        let count = {
            let mut blobs = self.blobs.write();
            blobs.insert(
                handle.clone(),
                Blob {
                    bytes,
                    mime: mime.into(),
                },
            );
            blobs.len()
        };
        crate::metrics::update_blob_handles(count);
        Ok(handle)
    }

    pub fn get(&self, handle: &BlobHandle) -> Option<Blob> {
        self.blobs.read().get(handle).cloned()
    }

    /// Release one handle. Returns whether it was live.
    pub fn revoke(&self, handle: &BlobHandle) -> bool {
        let (removed, count) = {
            let mut blobs = self.blobs.write();
            let removed = blobs.remove(handle).is_some();
            (removed, blobs.len())
        };
        crate::metrics::update_blob_handles(count);
        removed
    }

    /// Release every handle. Returns how many were live.
    pub fn revoke_all(&self) -> usize {
        let released = {
            let mut blobs = self.blobs.write();
            let n = blobs.len();
            blobs.clear();
            n
        };
        crate::metrics::update_blob_handles(0);
        if released > 0 {
            debug!("Revoked {} blob handles", released);
        }
        released
    }

    /// Revoke `old` (if any) and mint a handle for the new payload.
    pub fn replace(&self, old: Option<&BlobHandle>, bytes: Bytes, mime: impl Into<String>) -> Result<BlobHandle> {
        if let Some(old) = old {
            self.revoke(old);
        }
        self.mint(bytes, mime)
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Self-contained `data:` URL for a live handle.
    pub fn data_url(&self, handle: &BlobHandle) -> Option<String> {
        self.get(handle)
            .map(|blob| format!("data:{};base64,{}", blob.mime, STANDARD.encode(&blob.bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_and_revoke() {
        let registry = BlobRegistry::new();
        let a = registry.mint(Bytes::from_static(b"aaa"), "image/png").unwrap();
        let b = registry.mint(Bytes::from_static(b"bbb"), "image/png").unwrap();

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("blob:"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&a).unwrap().bytes, Bytes::from_static(b"aaa"));

        assert!(registry.revoke(&a));
        assert!(!registry.revoke(&a));
        assert!(registry.get(&a).is_none());
        assert_eq!(registry.revoke_all(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_payload_cannot_be_minted() {
        let registry = BlobRegistry::new();
        let err = registry.mint(Bytes::new(), "image/png").unwrap_err();
        assert!(matches!(err, CacheError::BlobMint(_)));
    }

    #[test]
    fn test_replace_revokes_previous() {
        let registry = BlobRegistry::new();
        let first = registry.mint(Bytes::from_static(b"v1"), "image/webp").unwrap();
        let second = registry
            .replace(Some(&first), Bytes::from_static(b"v2"), "image/webp")
            .unwrap();

        assert!(registry.get(&first).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&second).unwrap().bytes, Bytes::from_static(b"v2"));
    }

    #[test]
    fn test_data_url() {
        let registry = BlobRegistry::new();
        let handle = registry.mint(Bytes::from_static(b"hi"), "image/gif").unwrap();
        assert_eq!(registry.data_url(&handle).unwrap(), "data:image/gif;base64,aGk=");
    }
}
