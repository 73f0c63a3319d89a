//! Framebuffer Cache
//!
//! Render-to-texture passes borrow a framebuffer with a depth attachment of
//! the target's size. Framebuffers are kept after a pass and handed out to
//! the next pass with the same key; when more than `capacity` of them are
//! idle, the least recently used idle ones are evicted.

use log::debug;

use crate::errors::Result;
use crate::renderer::types::PixelFormat;

use super::driver::FramebufferHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub width: u16,
    pub height: u16,
    pub depth_format: PixelFormat,
}

#[derive(Debug, Clone, Copy)]
struct CachedFramebuffer {
    handle: FramebufferHandle,
    key: FramebufferKey,
    in_use: bool,
    last_used: u64,
}

#[derive(Debug, Default)]
pub struct FramebufferCache {
    entries: Vec<CachedFramebuffer>,
    capacity: Option<usize>,
    clock: u64,
}

impl FramebufferCache {
    /// `capacity` bounds idle framebuffers; `None` never evicts.
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            clock: 0,
        }
    }

    /// Borrows an idle framebuffer matching `key`, or one made by `create`.
    pub fn acquire_with<F>(&mut self, key: FramebufferKey, create: F) -> Result<FramebufferHandle>
    where
        F: FnOnce(&FramebufferKey) -> Result<FramebufferHandle>,
    {
        self.clock += 1;

        if let Some(entry) = self.entries.iter_mut().find(|e| !e.in_use && e.key == key) {
            entry.in_use = true;
            entry.last_used = self.clock;
            return Ok(entry.handle);
        }

        debug!("Allocating a framebuffer of size {}x{}", key.width, key.height);
        let handle = create(&key)?;
        self.entries.push(CachedFramebuffer {
            handle,
            key,
            in_use: true,
            last_used: self.clock,
        });
        Ok(handle)
    }

    /// Returns a framebuffer and evicts idle ones above the capacity.
    ///
    /// The returned handles are no longer tracked and should be deleted.
    pub fn release(&mut self, handle: FramebufferHandle) -> Vec<FramebufferHandle> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.handle == handle) {
            entry.in_use = false;
        }

        let Some(capacity) = self.capacity else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        while self.idle_count() > capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| !e.in_use)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(index, _)| index)
            else {
                break;
            };
            evicted.push(self.entries.swap_remove(oldest).handle);
        }
        evicted
    }

    /// Removes every framebuffer, returning their handles.
    pub fn drain(&mut self) -> Vec<FramebufferHandle> {
        self.entries.drain(..).map(|e| e.handle).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.in_use).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(size: u16) -> FramebufferKey {
        FramebufferKey {
            width: size,
            height: size,
            depth_format: PixelFormat::D24X8,
        }
    }

    #[test]
    fn test_reuses_idle_framebuffer() {
        let mut cache = FramebufferCache::new(None);
        let first = cache.acquire_with(key(64), |_| Ok(FramebufferHandle(1))).unwrap();
        cache.release(first);
        let second = cache.acquire_with(key(64), |_| Ok(FramebufferHandle(2))).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_in_use_framebuffer_is_not_shared() {
        let mut cache = FramebufferCache::new(None);
        let outer = cache.acquire_with(key(64), |_| Ok(FramebufferHandle(1))).unwrap();
        let inner = cache.acquire_with(key(64), |_| Ok(FramebufferHandle(2))).unwrap();
        assert_ne!(outer, inner);
    }

    #[test]
    fn test_evicts_least_recently_used_idle() {
        let mut cache = FramebufferCache::new(Some(1));
        let a = cache.acquire_with(key(16), |_| Ok(FramebufferHandle(1))).unwrap();
        let b = cache.acquire_with(key(32), |_| Ok(FramebufferHandle(2))).unwrap();

        assert!(cache.release(a).is_empty());
        assert_eq!(cache.release(b), vec![a]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.idle_count(), 1);
    }
}
