//! Recorded Operations
//!
//! [`OpCode`] is the closed set of operations a command buffer can hold.
//! Payloads reference frame data by handle ([`ArenaSpan`],
//! [`CommandBufferId`], [`CompiledBlockId`]) so an opcode is `Copy` and never
//! borrows the frame it was recorded into.

use glam::Vec4;

use crate::renderer::frame::{ArenaSpan, CommandBufferId, CompiledBlockId};
use crate::renderer::pipeline::feature_layout::PipelineFeatures;
use crate::renderer::resource_ids::{
    ConstantBufferId, FeatureLayoutId, IndexBufferId, InputLayoutId, ProgramId, TextureId,
    TransientTextureId, UniformLayoutId, VertexBufferId,
};
use crate::renderer::types::{
    ClearMask, CubeMapSide, NormalizedViewport, PrimitiveType, TextureDesc,
};
use crate::renderer::vertex_format::VertexFormat;

/// Parameters shared by indexed and non-indexed draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub primitives: PrimitiveType,
    pub first: u32,
    pub count: u32,
    /// State merged from the stack when the draw was recorded.
    pub state_block: CompiledBlockId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    Clear {
        color: Vec4,
        mask: ClearMask,
        depth: f32,
        stencil: u8,
    },
    /// Runs another command buffer to completion.
    Execute { commands: CommandBufferId },
    RenderToTexture {
        id: TextureId,
        side: Option<CubeMapSide>,
        viewport: NormalizedViewport,
        commands: CommandBufferId,
    },
    RenderToTransientTexture {
        id: TransientTextureId,
        side: Option<CubeMapSide>,
        viewport: NormalizedViewport,
        commands: CommandBufferId,
    },
    /// Runs a nested buffer against the current target with a sub-viewport.
    RenderToTarget {
        viewport: NormalizedViewport,
        commands: CommandBufferId,
    },
    UploadConstantBuffer { id: ConstantBufferId, data: ArenaSpan },
    UploadVertexBuffer { id: VertexBufferId, data: ArenaSpan },
    AcquireTexture { id: TransientTextureId, desc: TextureDesc },
    ReleaseTexture { id: TransientTextureId },
    CreateInputLayout { id: InputLayoutId, format: VertexFormat },
    CreateVertexBuffer { id: VertexBufferId, data: ArenaSpan },
    CreateIndexBuffer { id: IndexBufferId, data: ArenaSpan },
    CreateConstantBuffer {
        id: ConstantBufferId,
        data: ArenaSpan,
        layout: UniformLayoutId,
    },
    CreateTexture {
        id: TextureId,
        desc: TextureDesc,
        data: ArenaSpan,
    },
    DeleteTexture(TextureId),
    DeleteConstantBuffer(ConstantBufferId),
    DeleteProgram(ProgramId),
    PrecompilePermutation {
        program: ProgramId,
        features: PipelineFeatures,
        layout: FeatureLayoutId,
    },
    DrawIndexed(DrawCall),
    DrawPrimitives(DrawCall),
}

impl OpCode {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Clear { .. } => "Clear",
            Self::Execute { .. } => "Execute",
            Self::RenderToTexture { .. } => "RenderToTexture",
            Self::RenderToTransientTexture { .. } => "RenderToTransientTexture",
            Self::RenderToTarget { .. } => "RenderToTarget",
            Self::UploadConstantBuffer { .. } => "UploadConstantBuffer",
            Self::UploadVertexBuffer { .. } => "UploadVertexBuffer",
            Self::AcquireTexture { .. } => "AcquireTexture",
            Self::ReleaseTexture { .. } => "ReleaseTexture",
            Self::CreateInputLayout { .. } => "CreateInputLayout",
            Self::CreateVertexBuffer { .. } => "CreateVertexBuffer",
            Self::CreateIndexBuffer { .. } => "CreateIndexBuffer",
            Self::CreateConstantBuffer { .. } => "CreateConstantBuffer",
            Self::CreateTexture { .. } => "CreateTexture",
            Self::DeleteTexture(_) => "DeleteTexture",
            Self::DeleteConstantBuffer(_) => "DeleteConstantBuffer",
            Self::DeleteProgram(_) => "DeleteProgram",
            Self::PrecompilePermutation { .. } => "PrecompilePermutation",
            Self::DrawIndexed(_) => "DrawIndexed",
            Self::DrawPrimitives(_) => "DrawPrimitives",
        }
    }

    /// Nested command buffer run by this opcode, if any.
    #[must_use]
    pub fn nested_commands(&self) -> Option<CommandBufferId> {
        match *self {
            Self::Execute { commands }
            | Self::RenderToTexture { commands, .. }
            | Self::RenderToTransientTexture { commands, .. }
            | Self::RenderToTarget { commands, .. } => Some(commands),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_draw(&self) -> bool {
        matches!(self, Self::DrawIndexed(_) | Self::DrawPrimitives(_))
    }
}

/// An opcode together with its sorting key.
///
/// Keys are recorded for draws and are `0` for everything else. Buffers
/// replay in insertion order; the key is kept for callers that reorder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub sorting: u64,
    pub opcode: OpCode,
}
