//! Render State Layer
//!
//! - [`State`]: one atomic pipeline change with a stable category bit.
//! - [`StateBlock`]: an ordered group of states, at most one per category.
//! - [`StateStack`]: the LIFO composition of blocks active during recording.
//! - [`merge_blocks`]: flattens a stack into a [`CompiledStateBlock`].

mod block;
mod merge;
mod render_state;
mod stack;

pub use block::StateBlock;
pub use merge::{CompiledStateBlock, merge_blocks};
pub use render_state::{
    CONSTANT_BUFFER_BIT_OFFSET, POLYGON_OFFSET_SCALE, State, TEXTURE_BIT_OFFSET,
};
pub use stack::{ScopeToken, StateStack};

/// Bitmask of state categories.
pub type StateMask = u32;

/// Number of constant buffer binding slots.
pub const MAX_CONSTANT_BUFFERS: usize = 8;

/// Number of texture sampler slots.
pub const MAX_TEXTURE_SAMPLERS: usize = 8;
