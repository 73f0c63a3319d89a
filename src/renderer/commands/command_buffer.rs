//! Render Command Buffers
//!
//! A [`CommandBuffer`] is an append-only list of [`Command`]s owned by a
//! [`RenderFrame`]. Recording goes through a [`CommandRecorder`], a short-lived
//! view that borrows the frame so it can copy uploads into the arena and merge
//! the state stack at the moment a draw is recorded.
//!
//! ```rust,ignore
//! let target = frame.root().render_to_texture(shadow_map, NormalizedViewport::FULL)?;
//! frame.with_scope(
//!     |block| block.bind_vertex_buffer(vertices),
//!     |frame| frame.record(target)?.draw_primitives(0, PrimitiveType::Triangles, 0, 36),
//! )?;
//! ```

use bytemuck::Pod;
use glam::Vec4;

use crate::errors::{RenderError, Result};
use crate::renderer::frame::{CommandBufferId, RenderFrame};
use crate::renderer::resource_ids::{
    ConstantBufferId, TextureId, TransientTextureId, VertexBufferId,
};
use crate::renderer::state::StateBlock;
use crate::renderer::types::{
    ClearMask, CubeMapSide, NormalizedViewport, PixelFormat, PrimitiveType, TextureDesc,
};

use super::opcode::{Command, DrawCall, OpCode};

/// Highest local transient handle a single command buffer may issue.
pub const MAX_TRANSIENT_RESOURCES: u8 = u8::MAX - 1;

#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    /// Last local transient handle issued by this buffer.
    transient_index: u8,
}

impl CommandBuffer {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Recorded opcodes in insertion order.
    pub fn opcodes(&self) -> impl Iterator<Item = &OpCode> {
        self.commands.iter().map(|command| &command.opcode)
    }

    /// Number of transient textures acquired through this buffer.
    #[must_use]
    pub fn transient_count(&self) -> u8 {
        self.transient_index
    }

    pub fn reset(&mut self) {
        self.commands.clear();
        self.transient_index = 0;
    }

    pub(crate) fn push(&mut self, sorting: u64, opcode: OpCode) {
        self.commands.push(Command { sorting, opcode });
    }

    pub(crate) fn next_transient_id(&mut self) -> Result<TransientTextureId> {
        if self.transient_index >= MAX_TRANSIENT_RESOURCES {
            return Err(RenderError::TooManyTransientResources);
        }
        self.transient_index += 1;
        Ok(TransientTextureId::new(self.transient_index))
    }
}

/// Appends opcodes to one command buffer of a [`RenderFrame`].
pub struct CommandRecorder<'a> {
    frame: &'a mut RenderFrame,
    id: CommandBufferId,
}

impl<'a> CommandRecorder<'a> {
    pub(crate) fn new(frame: &'a mut RenderFrame, id: CommandBufferId) -> Self {
        Self { frame, id }
    }

    /// The buffer being recorded.
    #[inline]
    #[must_use]
    pub fn id(&self) -> CommandBufferId {
        self.id
    }

    fn push(&mut self, opcode: OpCode) -> Result<()> {
        self.frame.push_command(self.id, 0, opcode)
    }

    // ─── Clear / nesting ──────────────────────────────────────────────────────

    /// Clears the current target with depth `1.0` and stencil `0`.
    pub fn clear(&mut self, color: Vec4, mask: ClearMask) -> Result<()> {
        self.clear_with(color, mask, 1.0, 0)
    }

    pub fn clear_with(&mut self, color: Vec4, mask: ClearMask, depth: f32, stencil: u8) -> Result<()> {
        self.push(OpCode::Clear {
            color,
            mask,
            depth,
            stencil,
        })
    }

    /// Runs `commands` to completion at this point of the buffer.
    pub fn execute(&mut self, commands: CommandBufferId) -> Result<()> {
        self.frame.command_buffer(commands)?;
        if commands == self.id {
            return Err(RenderError::InvalidCommandBuffer(commands.raw()));
        }
        self.push(OpCode::Execute { commands })
    }

    // ─── Uploads ──────────────────────────────────────────────────────────────

    /// Copies `data` into the frame; the caller may reuse its buffer right away.
    pub fn upload_constant_buffer(&mut self, id: ConstantBufferId, data: &[u8]) -> Result<()> {
        let data = self.frame.copy_data(data)?;
        self.push(OpCode::UploadConstantBuffer { id, data })
    }

    pub fn upload_constant_buffer_typed<T: Pod>(&mut self, id: ConstantBufferId, value: &T) -> Result<()> {
        self.upload_constant_buffer(id, bytemuck::bytes_of(value))
    }

    pub fn upload_vertex_buffer(&mut self, id: VertexBufferId, data: &[u8]) -> Result<()> {
        let data = self.frame.copy_data(data)?;
        self.push(OpCode::UploadVertexBuffer { id, data })
    }

    pub fn upload_vertex_buffer_typed<T: Pod>(&mut self, id: VertexBufferId, vertices: &[T]) -> Result<()> {
        self.upload_vertex_buffer(id, bytemuck::cast_slice(vertices))
    }

    // ─── Transient textures ───────────────────────────────────────────────────

    /// Requests a pooled 2D render target for the rest of this buffer.
    ///
    /// The returned handle is local to this buffer (`1..=254`) and is mapped
    /// to a concrete texture when the buffer executes.
    pub fn acquire_texture_2d(&mut self, width: u16, height: u16, format: PixelFormat) -> Result<TransientTextureId> {
        self.acquire_texture(TextureDesc::texture_2d(width, height, format))
    }

    pub fn acquire_texture_cube(&mut self, size: u16, format: PixelFormat) -> Result<TransientTextureId> {
        self.acquire_texture(TextureDesc::cube(size, format))
    }

    pub fn acquire_texture(&mut self, desc: TextureDesc) -> Result<TransientTextureId> {
        if desc.format.is_compressed() {
            return Err(RenderError::UnsupportedFormat {
                format: desc.format,
                usage: "a transient render target",
            });
        }
        let id = self.frame.next_transient_id(self.id)?;
        self.push(OpCode::AcquireTexture { id, desc })?;
        Ok(id)
    }

    /// Returns a transient texture to the pool. Reusing `id` afterwards is
    /// not detected here.
    pub fn release_texture(&mut self, id: TransientTextureId) -> Result<()> {
        if !id.is_valid() {
            return Err(RenderError::InvalidTransientSlot(id.raw()));
        }
        self.push(OpCode::ReleaseTexture { id })
    }

    // ─── Render targets ───────────────────────────────────────────────────────

    /// Creates a nested buffer rendered into a transient texture.
    ///
    /// Continue recording into the returned buffer with [`RenderFrame::record`].
    pub fn render_to_texture(
        &mut self,
        id: TransientTextureId,
        viewport: NormalizedViewport,
    ) -> Result<CommandBufferId> {
        self.render_to_transient(id, None, viewport)
    }

    pub fn render_to_cube_map(
        &mut self,
        id: TransientTextureId,
        side: CubeMapSide,
        viewport: NormalizedViewport,
    ) -> Result<CommandBufferId> {
        self.render_to_transient(id, Some(side), viewport)
    }

    pub fn render_to_persistent_texture(
        &mut self,
        id: TextureId,
        viewport: NormalizedViewport,
    ) -> Result<CommandBufferId> {
        self.render_to_persistent(id, None, viewport)
    }

    pub fn render_to_persistent_cube_map(
        &mut self,
        id: TextureId,
        side: CubeMapSide,
        viewport: NormalizedViewport,
    ) -> Result<CommandBufferId> {
        self.render_to_persistent(id, Some(side), viewport)
    }

    /// Creates a nested buffer rendered into a sub-rectangle of whatever
    /// target is bound when this buffer executes.
    pub fn render_to_target(&mut self, viewport: NormalizedViewport) -> Result<CommandBufferId> {
        let commands = self.frame.create_command_buffer()?;
        self.push(OpCode::RenderToTarget { viewport, commands })?;
        Ok(commands)
    }

    fn render_to_transient(
        &mut self,
        id: TransientTextureId,
        side: Option<CubeMapSide>,
        viewport: NormalizedViewport,
    ) -> Result<CommandBufferId> {
        if !id.is_valid() {
            return Err(RenderError::InvalidTransientSlot(id.raw()));
        }
        let commands = self.frame.create_command_buffer()?;
        self.push(OpCode::RenderToTransientTexture {
            id,
            side,
            viewport,
            commands,
        })?;
        Ok(commands)
    }

    fn render_to_persistent(
        &mut self,
        id: TextureId,
        side: Option<CubeMapSide>,
        viewport: NormalizedViewport,
    ) -> Result<CommandBufferId> {
        let commands = self.frame.create_command_buffer()?;
        self.push(OpCode::RenderToTexture {
            id,
            side,
            viewport,
            commands,
        })?;
        Ok(commands)
    }

    // ─── Draws ────────────────────────────────────────────────────────────────

    /// Records an indexed draw with the state stack merged right now.
    pub fn draw_indexed(&mut self, sorting: u64, primitives: PrimitiveType, first: u32, count: u32) -> Result<()> {
        self.emit_draw(true, sorting, primitives, first, count, None)
    }

    /// Like [`draw_indexed`](Self::draw_indexed), with `states` taking
    /// precedence over every block on the stack.
    pub fn draw_indexed_with(
        &mut self,
        sorting: u64,
        primitives: PrimitiveType,
        first: u32,
        count: u32,
        states: &StateBlock,
    ) -> Result<()> {
        self.emit_draw(true, sorting, primitives, first, count, Some(states))
    }

    pub fn draw_primitives(&mut self, sorting: u64, primitives: PrimitiveType, first: u32, count: u32) -> Result<()> {
        self.emit_draw(false, sorting, primitives, first, count, None)
    }

    pub fn draw_primitives_with(
        &mut self,
        sorting: u64,
        primitives: PrimitiveType,
        first: u32,
        count: u32,
        states: &StateBlock,
    ) -> Result<()> {
        self.emit_draw(false, sorting, primitives, first, count, Some(states))
    }

    fn emit_draw(
        &mut self,
        indexed: bool,
        sorting: u64,
        primitives: PrimitiveType,
        first: u32,
        count: u32,
        override_block: Option<&StateBlock>,
    ) -> Result<()> {
        let state_block = self.frame.compile_state(override_block)?;
        let call = DrawCall {
            primitives,
            first,
            count,
            state_block,
        };
        let opcode = if indexed {
            OpCode::DrawIndexed(call)
        } else {
            OpCode::DrawPrimitives(call)
        };
        self.frame.push_command(self.id, sorting, opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::settings::RenderSettings;

    fn frame() -> RenderFrame {
        RenderFrame::new(&RenderSettings::default()).unwrap()
    }

    #[test]
    fn test_transient_handles_are_sequential() {
        let mut frame = frame();
        let mut root = frame.root();
        let a = root.acquire_texture_2d(64, 64, PixelFormat::Rgba8).unwrap();
        let b = root.acquire_texture_cube(32, PixelFormat::Rgba16F).unwrap();
        assert_eq!((a.raw(), b.raw()), (1, 2));
    }

    #[test]
    fn test_transient_limit() {
        let mut frame = frame();
        let mut root = frame.root();
        for _ in 0..MAX_TRANSIENT_RESOURCES {
            root.acquire_texture_2d(4, 4, PixelFormat::Rgba8).unwrap();
        }
        assert!(matches!(
            root.acquire_texture_2d(4, 4, PixelFormat::Rgba8),
            Err(RenderError::TooManyTransientResources)
        ));
    }

    #[test]
    fn test_compressed_targets_are_rejected() {
        let mut frame = frame();
        assert!(matches!(
            frame.root().acquire_texture_2d(4, 4, PixelFormat::Dxtc5),
            Err(RenderError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_execute_self_is_rejected() {
        let mut frame = frame();
        let root = frame.entry_point();
        assert!(matches!(
            frame.root().execute(root),
            Err(RenderError::InvalidCommandBuffer(0))
        ));
    }

    #[test]
    fn test_draw_sorting_key_is_kept() {
        let mut frame = frame();
        frame
            .root()
            .draw_indexed(42, PrimitiveType::Triangles, 0, 6)
            .unwrap();
        let commands = frame.command_buffer(frame.entry_point()).unwrap();
        assert_eq!(commands.commands()[0].sorting, 42);
        assert!(commands.commands()[0].opcode.is_draw());
    }
}
