//! Render Settings
//!
//! This module defines the configuration consumed by [`RenderFrame`] and
//! [`RenderingContext`] at construction time.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use pipewright::renderer::{RenderFrame, RenderSettings, RenderingContext};
//!
//! // Defaults: 1 MiB frame arena, 8 states per block, GLSL 1.10
//! let settings = RenderSettings::default();
//!
//! // GLSL ES target with a smaller arena and unbounded permutation cache
//! let settings = RenderSettings::default()
//!     .with_frame_arena_capacity(256 * 1024)
//!     .with_glsl_version(100)
//!     .with_float_precision("mediump")
//!     .with_permutation_cache_capacity(None);
//!
//! let mut frame = RenderFrame::new(&settings)?;
//! let mut context = RenderingContext::new(driver, settings);
//! ```
//!
//! [`RenderFrame`]: crate::renderer::frame::RenderFrame
//! [`RenderingContext`]: crate::renderer::context::RenderingContext

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default size of the per-frame linear arena in bytes.
pub const DEFAULT_FRAME_ARENA_CAPACITY: usize = 1024 * 1024;

/// Default number of states one block may hold.
pub const DEFAULT_STATE_BLOCK_CAPACITY: usize = 8;

/// Default maximum number of blocks on the state stack.
pub const DEFAULT_MAX_STATE_STACK_DEPTH: usize = 10;

// ---------------------------------------------------------------------------
// RenderSettings
// ---------------------------------------------------------------------------

/// Global configuration for frames and the rendering context.
///
/// # Fields
///
/// | Field                        | Description                                  | Default     |
/// |------------------------------|----------------------------------------------|-------------|
/// | `frame_arena_capacity`       | Bytes in each frame's linear arena           | 1 MiB       |
/// | `state_block_capacity`       | States per block and per merged draw         | 8           |
/// | `max_state_stack_depth`      | Maximum active state scopes                  | 10          |
/// | `permutation_cache_capacity` | Compiled permutations kept alive (LRU)       | `Some(256)` |
/// | `framebuffer_cache_capacity` | Idle framebuffers kept alive (LRU)           | `Some(16)`  |
/// | `glsl_version`               | `#version` emitted into generated shaders    | 110         |
/// | `float_precision`            | Default float precision (GLSL ES targets)    | `None`      |
/// | `uniform_caching`            | Skip uniform uploads for unchanged buffers   | `true`      |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    // === Frame Recording ===
    /// Capacity of the per-frame linear arena.
    ///
    /// Command buffers, uploaded data copies and compiled state blocks are all
    /// charged against it. The arena never grows: recording past the capacity
    /// fails with [`FrameArenaExhausted`](crate::errors::RenderError::FrameArenaExhausted).
    pub frame_arena_capacity: usize,

    /// Number of states a single block, and a merged draw, may carry.
    pub state_block_capacity: usize,

    /// Maximum number of blocks pushed on the state stack at once.
    pub max_state_stack_depth: usize,

    // === Caches ===
    /// Number of compiled shader permutations kept alive.
    ///
    /// The least recently used permutation is deleted when the cap is
    /// exceeded. `None` keeps every permutation for the lifetime of the context.
    pub permutation_cache_capacity: Option<usize>,

    /// Number of idle framebuffers kept alive.
    ///
    /// Framebuffers in use by a render-to-texture pass are never evicted.
    pub framebuffer_cache_capacity: Option<usize>,

    // === Shader Generation ===
    /// GLSL version written at the top of every generated stage.
    pub glsl_version: u32,

    /// Default float precision qualifier (`lowp`, `mediump`, `highp`).
    ///
    /// Only needed on GLSL ES targets; `None` emits no precision statement.
    pub float_precision: Option<String>,

    /// Upload uniforms of a constant buffer only when its contents changed
    /// since the last upload to the same permutation.
    pub uniform_caching: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frame_arena_capacity: DEFAULT_FRAME_ARENA_CAPACITY,
            state_block_capacity: DEFAULT_STATE_BLOCK_CAPACITY,
            max_state_stack_depth: DEFAULT_MAX_STATE_STACK_DEPTH,
            permutation_cache_capacity: Some(256),
            framebuffer_cache_capacity: Some(16),
            glsl_version: 110,
            float_precision: None,
            uniform_caching: true,
        }
    }
}

impl RenderSettings {
    #[must_use]
    pub fn with_frame_arena_capacity(mut self, bytes: usize) -> Self {
        self.frame_arena_capacity = bytes;
        self
    }

    #[must_use]
    pub fn with_state_block_capacity(mut self, capacity: usize) -> Self {
        self.state_block_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_max_state_stack_depth(mut self, depth: usize) -> Self {
        self.max_state_stack_depth = depth;
        self
    }

    #[must_use]
    pub fn with_permutation_cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.permutation_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_framebuffer_cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.framebuffer_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_glsl_version(mut self, version: u32) -> Self {
        self.glsl_version = version;
        self
    }

    #[must_use]
    pub fn with_float_precision(mut self, precision: impl Into<String>) -> Self {
        self.float_precision = Some(precision.into());
        self
    }

    #[must_use]
    pub fn with_uniform_caching(mut self, enabled: bool) -> Self {
        self.uniform_caching = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RenderSettings::default();
        assert_eq!(settings.frame_arena_capacity, 1024 * 1024);
        assert_eq!(settings.state_block_capacity, 8);
        assert_eq!(settings.max_state_stack_depth, 10);
        assert_eq!(settings.permutation_cache_capacity, Some(256));
        assert!(settings.float_precision.is_none());
    }

    #[test]
    fn test_builder_setters() {
        let settings = RenderSettings::default()
            .with_glsl_version(100)
            .with_float_precision("mediump")
            .with_framebuffer_cache_capacity(None);
        assert_eq!(settings.glsl_version, 100);
        assert_eq!(settings.float_precision.as_deref(), Some("mediump"));
        assert_eq!(settings.framebuffer_cache_capacity, None);
    }
}
