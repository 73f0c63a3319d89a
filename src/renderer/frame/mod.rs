//! Frame Layer
//!
//! Per-frame recording storage: the linear arena and the [`RenderFrame`]
//! that owns it together with the state stack and command buffers.

mod allocator;
mod render_frame;

pub use allocator::{ARENA_ALIGNMENT, ArenaSpan, FrameAllocator, SpanStorage};
pub(crate) use allocator::span_bytes;
pub use render_frame::{CommandBufferId, CompiledBlockId, RenderFrame};
