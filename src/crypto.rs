//! Proof-of-work hash primitive
//!
//! The search loop only needs a deterministic `hash(bytes) -> digest`. The
//! primitive is modelled after VM-style PoW libraries: an engine is
//! initialised once from key material (the "cache"), then each search task
//! creates its own hasher (the "VM") from it.
//!
//! [`Blake2sEngine`] is the bundled engine: Blake2s-256 keyed by prefixing the
//! key material. Other engines plug in by implementing [`HashEngine`].

use crate::types::Digest;
use crate::Result;
use blake2::{Blake2s256, Digest as _};

/// Per-task hasher created from an engine
pub trait PowHasher: Send {
    /// Hash one candidate blob
    fn hash(&mut self, input: &[u8]) -> Result<Digest>;
}

/// Shared, initialised hash engine
pub trait HashEngine: Send + Sync + 'static {
    /// Engine name for logging
    fn name(&self) -> &'static str;

    /// Create an independent hasher for one search task
    fn create_hasher(&self) -> Result<Box<dyn PowHasher>>;
}

/// Blake2s-256 engine keyed with the configured key material
#[derive(Clone)]
pub struct Blake2sEngine {
    cache: Blake2s256,
}

impl Blake2sEngine {
    /// Initialise the engine from key material
    pub fn init_cache(key_material: impl AsRef<[u8]>) -> Self {
        Self {
            cache: Blake2s256::new_with_prefix(key_material.as_ref()),
        }
    }
}

impl HashEngine for Blake2sEngine {
    fn name(&self) -> &'static str {
        "blake2s"
    }

    fn create_hasher(&self) -> Result<Box<dyn PowHasher>> {
        Ok(Box::new(Blake2sHasher {
            seeded: self.cache.clone(),
        }))
    }
}

/// Hasher produced by [`Blake2sEngine`]
pub struct Blake2sHasher {
    seeded: Blake2s256,
}

impl PowHasher for Blake2sHasher {
    fn hash(&mut self, input: &[u8]) -> Result<Digest> {
        let mut hasher = self.seeded.clone();
        hasher.update(input);
        Ok(hasher.finalize().into())
    }
}
