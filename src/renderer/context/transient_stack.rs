//! Transient Resource Stack
//!
//! Command buffers name transient textures by small local slots. The same
//! slot may be used by a buffer and by a buffer it renders into, so every
//! command buffer execution gets its own frame of slots:
//!
//! ```text
//!            slot 1   slot 2   ...  slot 254
//! frame 2  [ tex 9  |        |     |       ]  ← render-to-texture pass
//! frame 1  [ tex 4  | tex 5  |     |       ]  ← entry point
//! frame 0  [        |        |     |       ]  (unused base)
//! ```
//!
//! Popping a frame with occupied slots is tolerated: the leak is logged
//! and the global ids are handed back for recycling.

use log::warn;
use smallvec::SmallVec;

use crate::errors::{RenderError, Result};
use crate::renderer::commands::MAX_TRANSIENT_RESOURCES;
use crate::renderer::resource_ids::{TextureId, TransientTextureId};

/// Slots per stack frame: one for every local handle a command buffer can
/// issue, so any handle accepted at record time resolves at execution.
pub const STACK_FRAME_SIZE: usize = MAX_TRANSIENT_RESOURCES as usize;

/// Maximum nesting of command buffer executions.
pub const MAX_STACK_FRAMES: usize = 8;

#[derive(Debug, Clone)]
pub struct TransientResourceStack {
    slots: [[TextureId; STACK_FRAME_SIZE]; MAX_STACK_FRAMES],
    depth: usize,
}

impl Default for TransientResourceStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TransientResourceStack {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: [[TextureId::INVALID; STACK_FRAME_SIZE]; MAX_STACK_FRAMES],
            depth: 0,
        }
    }

    /// Index of the active frame.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn push_frame(&mut self) -> Result<()> {
        if self.depth + 1 >= MAX_STACK_FRAMES {
            return Err(RenderError::TransientStackOverflow);
        }
        self.depth += 1;
        self.slots[self.depth] = [TextureId::INVALID; STACK_FRAME_SIZE];
        Ok(())
    }

    /// Pops the active frame, returning the global ids still loaded in it.
    pub fn pop_frame(&mut self) -> Result<SmallVec<[TextureId; 4]>> {
        if self.depth == 0 {
            return Err(RenderError::TransientStackUnderflow);
        }

        let mut leaked = SmallVec::new();
        for (index, id) in self.slots[self.depth].iter_mut().enumerate() {
            if id.is_valid() {
                warn!(
                    "Transient texture {id} in slot {} was not released before its command buffer finished",
                    index + 1
                );
                leaked.push(std::mem::take(id));
            }
        }

        self.depth -= 1;
        Ok(leaked)
    }

    fn slot(local: TransientTextureId) -> Result<usize> {
        let index = usize::from(local.raw());
        if index == 0 || index > STACK_FRAME_SIZE {
            return Err(RenderError::InvalidTransientSlot(local.raw()));
        }
        Ok(index - 1)
    }

    /// Binds `global` to the local slot of the active frame.
    pub fn load(&mut self, local: TransientTextureId, global: TextureId) -> Result<()> {
        let slot = Self::slot(local)?;
        self.slots[self.depth][slot] = global;
        Ok(())
    }

    /// Clears a local slot, returning the id it held.
    pub fn unload(&mut self, local: TransientTextureId) -> Result<TextureId> {
        let slot = Self::slot(local)?;
        let id = std::mem::take(&mut self.slots[self.depth][slot]);
        if !id.is_valid() {
            return Err(RenderError::InvalidTransientSlot(local.raw()));
        }
        Ok(id)
    }

    /// Resolves a local slot of the active frame.
    pub fn get(&self, local: TransientTextureId) -> Result<TextureId> {
        let slot = Self::slot(local)?;
        let id = self.slots[self.depth][slot];
        if !id.is_valid() {
            return Err(RenderError::InvalidTransientSlot(local.raw()));
        }
        Ok(id)
    }

    /// Drops every frame without reporting leaks.
    pub fn reset(&mut self) {
        self.slots = [[TextureId::INVALID; STACK_FRAME_SIZE]; MAX_STACK_FRAMES];
        self.depth = 0;
    }
}
