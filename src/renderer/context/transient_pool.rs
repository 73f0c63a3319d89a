//! Transient Texture Pool
//!
//! Textures acquired by command buffers for a part of a frame. Released
//! textures go back to a free list and are handed out again to the next
//! request with the same type, size and format.
//!
//! # Design
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              TransientTexturePool                   │
//! │                                                     │
//! │  leased: TextureId → PooledTexture                  │
//! │  free:   TextureKey → [PooledTexture]               │
//! │                                                     │
//! │  acquire_with()  (AcquireTexture opcode)            │
//! │  release()       (ReleaseTexture opcode)            │
//! │  trim()          (end of frame)                     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The pool never talks to the driver. Creating a texture on a miss is
//! delegated to the caller, and [`trim`](TransientTexturePool::trim) returns
//! the evicted ids so the caller can delete them.

use log::debug;
use rustc_hash::FxHashMap;

use crate::errors::{RenderError, Result};
use crate::renderer::resource_ids::{ResourceKind, TextureId};
use crate::renderer::types::{PixelFormat, TextureDesc, TextureType};

/// Properties a free texture must match to be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub ty: TextureType,
    pub width: u16,
    pub height: u16,
    pub format: PixelFormat,
}

impl TextureKey {
    #[must_use]
    pub fn from_desc(desc: &TextureDesc) -> Self {
        Self {
            ty: desc.ty,
            width: desc.width,
            height: desc.height,
            format: desc.format,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PooledTexture {
    id: TextureId,
    key: TextureKey,
    /// Frames spent in the free list without being reused.
    idle_frames: u32,
}

#[derive(Debug, Default)]
pub struct TransientTexturePool {
    leased: FxHashMap<TextureId, PooledTexture>,
    free: FxHashMap<TextureKey, Vec<PooledTexture>>,
}

impl TransientTexturePool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Leases a free texture matching `key`, or one made by `create`.
    pub fn acquire_with<F>(&mut self, key: TextureKey, create: F) -> Result<TextureId>
    where
        F: FnOnce(&TextureKey) -> Result<TextureId>,
    {
        let pooled = match self.free.get_mut(&key).and_then(Vec::pop) {
            Some(mut pooled) => {
                pooled.idle_frames = 0;
                pooled
            }
            None => {
                debug!(
                    "Allocating a transient {} texture of size {}x{}",
                    key.ty, key.width, key.height
                );
                PooledTexture {
                    id: create(&key)?,
                    key,
                    idle_frames: 0,
                }
            }
        };

        self.leased.insert(pooled.id, pooled);
        Ok(pooled.id)
    }

    /// Returns a leased texture to the free list.
    pub fn release(&mut self, id: TextureId) -> Result<()> {
        let pooled = self.leased.remove(&id).ok_or(RenderError::InvalidResource {
            kind: ResourceKind::Texture,
            id: id.raw(),
        })?;
        self.free.entry(pooled.key).or_default().push(pooled);
        Ok(())
    }

    #[must_use]
    pub fn is_leased(&self, id: TextureId) -> bool {
        self.leased.contains_key(&id)
    }

    /// Drops a free texture that is deleted outside the pool.
    ///
    /// Returns `true` when the texture was pooled.
    pub fn forget(&mut self, id: TextureId) -> bool {
        let mut found = false;
        for bucket in self.free.values_mut() {
            bucket.retain(|pooled| {
                let keep = pooled.id != id;
                found |= !keep;
                keep
            });
        }
        self.free.retain(|_, bucket| !bucket.is_empty());
        found
    }

    /// Ages the free list by one frame and evicts textures idle for more
    /// than `max_idle_frames`.
    pub fn trim(&mut self, max_idle_frames: u32) -> Vec<TextureId> {
        let mut evicted = Vec::new();
        for bucket in self.free.values_mut() {
            for pooled in bucket.iter_mut() {
                pooled.idle_frames += 1;
            }
            bucket.retain(|pooled| {
                let keep = pooled.idle_frames <= max_idle_frames;
                if !keep {
                    evicted.push(pooled.id);
                }
                keep
            });
        }
        self.free.retain(|_, bucket| !bucket.is_empty());
        evicted
    }

    /// Removes every texture from the pool, returning their ids.
    pub fn drain(&mut self) -> Vec<TextureId> {
        self.leased
            .drain()
            .map(|(id, _)| id)
            .chain(self.free.drain().flat_map(|(_, bucket)| bucket).map(|pooled| pooled.id))
            .collect()
    }

    /// Textures managed by the pool, leased and free.
    #[must_use]
    pub fn total_texture_count(&self) -> usize {
        self.leased.len() + self.free_count()
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}
