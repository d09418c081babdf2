use std::sync::atomic::{AtomicU32, Ordering};

use slotmap::new_key_type;

new_key_type! { pub struct PassKey; }
new_key_type! { pub struct VersionKey; }

/// Identifies the builder that minted a handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BuilderId(u32);

impl BuilderId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PassHandle {
    pub(crate) builder: BuilderId,
    pub(crate) key: PassKey,
}

/// A specific write-version of a texture.
///
/// Every write produces a fresh handle; only the most recent one may be used
/// for further reads and writes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    pub(crate) builder: BuilderId,
    pub(crate) version: VersionKey,
}

/// Index of a logical texture inside one of the builder's resource tables.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    Graph(usize),
    Import(usize),
}
