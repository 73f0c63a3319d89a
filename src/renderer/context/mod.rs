//! Rendering Context
//!
//! Provides:
//! - RenderingContext: resource requests, frame execution and presentation
//! - Driver: the device interface the context issues calls through
//! - HeadlessDriver: an in-memory driver for tooling and tests
//! - TransientResourceStack / TransientTexturePool: per-pass texture slots
//!   and the textures behind them
//! - PermutationCache / FramebufferCache: compiled programs and render
//!   target framebuffers kept between frames

pub mod driver;
pub mod framebuffer_cache;
pub mod headless;
pub mod permutation_cache;
pub mod rendering_context;
pub mod transient_pool;
pub mod transient_stack;

pub use driver::{
    ActiveUniform, BufferHandle, BufferKind, Driver, DriverError, FramebufferHandle, ProgramHandle,
    ShaderHandle, TextureHandle,
};
pub use framebuffer_cache::{FramebufferCache, FramebufferKey};
pub use headless::{DriverCalls, HeadlessDriver, HeadlessFramebuffer, RasterState, RecordedDraw};
pub use permutation_cache::{BufferRevision, Permutation, PermutationCache, PermutationUniform};
pub use rendering_context::{RenderCounters, RenderingContext};
pub use transient_pool::{TextureKey, TransientTexturePool};
pub use transient_stack::{MAX_STACK_FRAMES, STACK_FRAME_SIZE, TransientResourceStack};
