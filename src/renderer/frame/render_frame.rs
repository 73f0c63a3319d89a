//! Render Frame
//!
//! A [`RenderFrame`] is everything one producer records for one displayed
//! frame:
//!
//! ```text
//! RenderFrame
//!  ├─ FrameAllocator      fixed-capacity arena (uploads, blocks, buffers)
//!  ├─ StateStack          blocks active while recording
//!  ├─ command buffers     [0] = entry point, [1..] = nested passes
//!  └─ compiled blocks     merged draw states, referenced by draw opcodes
//! ```
//!
//! After construction and after every [`clear`](RenderFrame::clear) the
//! frame holds exactly one empty command buffer, the entry point, and is
//! ready to record.

use std::sync::Arc;

use log::trace;

use crate::errors::{RenderError, Result};
use crate::renderer::commands::{CommandBuffer, CommandRecorder, OpCode};
use crate::renderer::resource_ids::TransientTextureId;
use crate::renderer::settings::RenderSettings;
use crate::renderer::state::{
    CompiledStateBlock, ScopeToken, State, StateBlock, StateStack, merge_blocks,
};

use super::allocator::{ArenaSpan, FrameAllocator};

/// Handle to a command buffer owned by a [`RenderFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandBufferId(u32);

impl CommandBufferId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Handle to a merged state block stored in a [`RenderFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompiledBlockId(u32);

impl CompiledBlockId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub struct RenderFrame {
    allocator: FrameAllocator,
    state_stack: StateStack,
    command_buffers: Vec<CommandBuffer>,
    compiled_blocks: Vec<CompiledStateBlock>,
}

impl RenderFrame {
    /// Creates a frame with its entry point command buffer.
    pub fn new(settings: &RenderSettings) -> Result<Self> {
        let mut frame = Self {
            allocator: FrameAllocator::new(settings.frame_arena_capacity),
            state_stack: StateStack::new(
                settings.max_state_stack_depth,
                settings.state_block_capacity,
            ),
            command_buffers: Vec::new(),
            compiled_blocks: Vec::new(),
        };
        frame.create_command_buffer()?;
        Ok(frame)
    }

    // ─── Command buffers ──────────────────────────────────────────────────────

    /// The root command buffer executed by `display`.
    #[inline]
    #[must_use]
    pub fn entry_point(&self) -> CommandBufferId {
        CommandBufferId(0)
    }

    /// Allocates a new empty command buffer inside this frame.
    pub fn create_command_buffer(&mut self) -> Result<CommandBufferId> {
        self.allocator.reserve::<CommandBuffer>(1)?;
        let id = CommandBufferId(self.command_buffers.len() as u32);
        self.command_buffers.push(CommandBuffer::new());
        Ok(id)
    }

    pub fn command_buffer(&self, id: CommandBufferId) -> Result<&CommandBuffer> {
        self.command_buffers
            .get(id.index())
            .ok_or(RenderError::InvalidCommandBuffer(id.raw()))
    }

    #[must_use]
    pub fn command_buffer_count(&self) -> usize {
        self.command_buffers.len()
    }

    /// Starts recording into `id`.
    pub fn record(&mut self, id: CommandBufferId) -> Result<CommandRecorder<'_>> {
        self.command_buffer(id)?;
        Ok(CommandRecorder::new(self, id))
    }

    /// Shorthand for recording into the entry point.
    #[must_use]
    pub fn root(&mut self) -> CommandRecorder<'_> {
        let id = self.entry_point();
        CommandRecorder::new(self, id)
    }

    // ─── Arena ────────────────────────────────────────────────────────────────

    /// Bump-allocates `size` bytes from the frame arena.
    pub fn allocate(&mut self, size: usize) -> Result<ArenaSpan> {
        self.allocator.allocate(size)
    }

    #[must_use]
    pub fn allocator(&self) -> &FrameAllocator {
        &self.allocator
    }

    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.allocator.allocated_bytes()
    }

    // ─── State stack ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn state_stack(&self) -> &StateStack {
        &self.state_stack
    }

    /// Pushes a new frame-scoped block; its storage is charged to the arena.
    pub fn push_scope(&mut self) -> Result<ScopeToken> {
        self.allocator.reserve::<StateBlock>(1)?;
        self.state_stack.push_scope()
    }

    pub fn push_shared(&mut self, block: Arc<StateBlock>) -> Result<ScopeToken> {
        self.state_stack.push_shared(block)
    }

    pub fn pop_scope(&mut self, token: ScopeToken) -> Result<()> {
        self.state_stack.pop(token)
    }

    /// The block of the innermost scope, if it was created by [`push_scope`](Self::push_scope).
    pub fn top_block_mut(&mut self) -> Option<&mut StateBlock> {
        self.state_stack.top_mut()
    }

    /// Runs `body` with a new block configured by `configure` on top of the stack.
    ///
    /// The block is popped when `body` returns, whether it succeeded or not.
    pub fn with_scope<C, B, R>(&mut self, configure: C, body: B) -> Result<R>
    where
        C: FnOnce(&mut StateBlock) -> Result<()>,
        B: FnOnce(&mut Self) -> Result<R>,
    {
        let token = self.push_scope()?;
        let result = self.run_scope(configure, body);
        let popped = self.state_stack.pop(token);
        let value = result?;
        popped?;
        Ok(value)
    }

    fn run_scope<C, B, R>(&mut self, configure: C, body: B) -> Result<R>
    where
        C: FnOnce(&mut StateBlock) -> Result<()>,
        B: FnOnce(&mut Self) -> Result<R>,
    {
        let block = self
            .state_stack
            .top_mut()
            .ok_or(RenderError::StateStackUnderflow)?;
        configure(block)?;
        body(self)
    }

    /// Runs `body` with a shared block on top of the stack.
    pub fn with_shared<B, R>(&mut self, block: Arc<StateBlock>, body: B) -> Result<R>
    where
        B: FnOnce(&mut Self) -> Result<R>,
    {
        let token = self.state_stack.push_shared(block)?;
        let result = body(self);
        let popped = self.state_stack.pop(token);
        let value = result?;
        popped?;
        Ok(value)
    }

    // ─── Compiled blocks ──────────────────────────────────────────────────────

    pub fn compiled_block(&self, id: CompiledBlockId) -> Result<&CompiledStateBlock> {
        self.compiled_blocks
            .get(id.index())
            .ok_or(RenderError::IndexOutOfRange {
                context: "compiled state block",
                index: id.index(),
                max: self.compiled_blocks.len(),
            })
    }

    #[must_use]
    pub fn compiled_block_count(&self) -> usize {
        self.compiled_blocks.len()
    }

    /// Merges the active stack, preceded by `override_block`, into a new
    /// compiled block.
    ///
    /// The number of merged states is bounded by what is left in the arena.
    pub(crate) fn compile_state(
        &mut self,
        override_block: Option<&StateBlock>,
    ) -> Result<CompiledBlockId> {
        let max_states = self
            .allocator
            .remaining()
            .saturating_sub(size_of::<CompiledStateBlock>())
            / size_of::<State>();
        let compiled = merge_blocks(
            override_block.into_iter().chain(self.state_stack.blocks()),
            max_states,
        )?;
        self.allocator.reserve_bytes(compiled.footprint())?;

        let id = CompiledBlockId(self.compiled_blocks.len() as u32);
        self.compiled_blocks.push(compiled);
        Ok(id)
    }

    // ─── Recording helpers ────────────────────────────────────────────────────

    pub(crate) fn copy_data(&mut self, data: &[u8]) -> Result<ArenaSpan> {
        self.allocator.copy_from_slice(data)
    }

    pub(crate) fn push_command(
        &mut self,
        id: CommandBufferId,
        sorting: u64,
        opcode: OpCode,
    ) -> Result<()> {
        self.command_buffers
            .get_mut(id.index())
            .ok_or(RenderError::InvalidCommandBuffer(id.raw()))?
            .push(sorting, opcode);
        Ok(())
    }

    pub(crate) fn next_transient_id(&mut self, id: CommandBufferId) -> Result<TransientTextureId> {
        self.command_buffers
            .get_mut(id.index())
            .ok_or(RenderError::InvalidCommandBuffer(id.raw()))?
            .next_transient_id()
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    /// Discards everything recorded and recreates the entry point.
    pub fn clear(&mut self) -> Result<()> {
        trace!(
            "Clearing frame: {} command buffers, {} compiled blocks, {} bytes",
            self.command_buffers.len(),
            self.compiled_blocks.len(),
            self.allocator.allocated_bytes()
        );

        for commands in &mut self.command_buffers {
            commands.reset();
        }
        self.command_buffers.clear();
        self.compiled_blocks.clear();
        self.state_stack.reset();
        self.allocator.reset();
        self.create_command_buffer()?;
        Ok(())
    }
}
