//! Tagged value codec.
//!
//! Values are persisted as `(type tag, JSON payload)` pairs so a row can be
//! reconstructed without an external schema.  Decoding is polymorphic: the
//! [`Codec`] keeps a registry mapping each tag to a decode function, and a
//! tag that cannot be resolved fails loudly with
//! [`StoreError::UnknownTag`](crate::error::StoreError::UnknownTag).
//!
//! Types opt in via the [`Persist`] trait.  Values must be structurally
//! serializable (no cycles, no non-data members) — a caller contract the
//! codec does not verify beyond what `serde_json` itself catches.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::{StoreError, StoreResult};

/// A value that can round-trip through the store.
///
/// `TAG` must be stable across releases: it is written into every row and
/// resolved back to the concrete type at decode time.
pub trait Persist: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable type identifier stored alongside the payload.
    const TAG: &'static str;
}

/// A decoded value, type-erased for the read cache.
pub type Decoded = Arc<dyn Any + Send + Sync>;

type DecodeFn = Arc<dyn Fn(&str) -> StoreResult<Decoded> + Send + Sync>;

/// Tag-indexed encode/decode registry.
///
/// Cheaply cloneable; all clones share one decoder table.
#[derive(Clone, Default)]
pub struct Codec {
    decoders: Arc<DashMap<&'static str, DecodeFn>>,
}

impl Codec {
    /// Create a codec with no registered decoders.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`'s decoder under [`Persist::TAG`].  Idempotent.
    ///
    /// Writes register the type automatically; call this explicitly for
    /// types that may be read cold before the process ever writes them.
    pub fn register<T: Persist>(&self) {
        self.decoders.entry(T::TAG).or_insert_with(|| {
            trace!(tag = T::TAG, "decoder registered");
            Arc::new(|payload| {
                let value: T =
                    serde_json::from_str(payload).map_err(|e| StoreError::Decode {
                        tag: T::TAG.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Arc::new(value) as Decoded)
            })
        });
    }

    /// Encode a value into its `(tag, payload)` row representation.
    ///
    /// Also registers `T`'s decoder so anything written this process is
    /// always readable.
    pub fn encode<T: Persist>(&self, value: &T) -> StoreResult<(&'static str, String)> {
        self.register::<T>();
        let payload = serde_json::to_string(value).map_err(|e| StoreError::Encode {
            tag: T::TAG.to_string(),
            reason: e.to_string(),
        })?;
        Ok((T::TAG, payload))
    }

    /// Decode a `(tag, payload)` row back into a type-erased value.
    pub fn decode(&self, tag: &str, payload: &str) -> StoreResult<Decoded> {
        let decoder = self
            .decoders
            .get(tag)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::UnknownTag {
                tag: tag.to_string(),
            })?;
        decoder(payload)
    }

    /// Whether a decoder is registered for `tag`.
    pub fn resolves(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }
}

// ── tests ────────────────────────────────────────────────────────────
