//! Resource Construction Buffer
//!
//! Resource requests made on the rendering context return an id right away;
//! the driver object is built the next time the context displays a frame,
//! before any draw of that frame runs. The pending requests are recorded
//! here.
//!
//! Unlike a frame command buffer this one keeps its own growable byte
//! storage, since requests may be made at any time between two frames.

use crate::errors::Result;
use crate::renderer::frame::{ARENA_ALIGNMENT, ArenaSpan, SpanStorage, span_bytes};
use crate::renderer::pipeline::feature_layout::PipelineFeatures;
use crate::renderer::resource_ids::{
    ConstantBufferId, FeatureLayoutId, IndexBufferId, InputLayoutId, ProgramId, TextureId,
    UniformLayoutId, VertexBufferId,
};
use crate::renderer::types::TextureDesc;
use crate::renderer::vertex_format::VertexFormat;

use super::opcode::{Command, OpCode};

#[derive(Debug, Default)]
pub struct ResourceCommandBuffer {
    commands: Vec<Command>,
    storage: Vec<u8>,
}

impl ResourceCommandBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, opcode: OpCode) {
        self.commands.push(Command { sorting: 0, opcode });
    }

    /// Copies `data` into the buffer's storage.
    fn adopt(&mut self, data: &[u8]) -> ArenaSpan {
        let offset = self.storage.len().next_multiple_of(ARENA_ALIGNMENT);
        self.storage.resize(offset, 0);
        self.storage.extend_from_slice(data);
        ArenaSpan::new(offset, data.len())
    }

    pub fn create_input_layout(&mut self, id: InputLayoutId, format: VertexFormat) {
        self.push(OpCode::CreateInputLayout { id, format });
    }

    pub fn create_vertex_buffer(&mut self, id: VertexBufferId, data: &[u8]) {
        let data = self.adopt(data);
        self.push(OpCode::CreateVertexBuffer { id, data });
    }

    pub fn create_index_buffer(&mut self, id: IndexBufferId, data: &[u8]) {
        let data = self.adopt(data);
        self.push(OpCode::CreateIndexBuffer { id, data });
    }

    pub fn create_constant_buffer(&mut self, id: ConstantBufferId, data: &[u8], layout: UniformLayoutId) {
        let data = self.adopt(data);
        self.push(OpCode::CreateConstantBuffer { id, data, layout });
    }

    /// `data` may be empty for textures that are only rendered into.
    pub fn create_texture(&mut self, id: TextureId, desc: TextureDesc, data: &[u8]) {
        let data = self.adopt(data);
        self.push(OpCode::CreateTexture { id, desc, data });
    }

    pub fn delete_texture(&mut self, id: TextureId) {
        self.push(OpCode::DeleteTexture(id));
    }

    pub fn delete_constant_buffer(&mut self, id: ConstantBufferId) {
        self.push(OpCode::DeleteConstantBuffer(id));
    }

    pub fn delete_program(&mut self, id: ProgramId) {
        self.push(OpCode::DeleteProgram(id));
    }

    /// Compiles a permutation ahead of its first draw. `layout` masks
    /// `features` the way a draw with that feature layout bound would.
    pub fn precompile_permutation(&mut self, program: ProgramId, features: PipelineFeatures, layout: FeatureLayoutId) {
        self.push(OpCode::PrecompilePermutation {
            program,
            features,
            layout,
        });
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drops every pending request together with the adopted data.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.storage.clear();
    }
}

impl SpanStorage for ResourceCommandBuffer {
    fn bytes(&self, span: ArenaSpan) -> Result<&[u8]> {
        span_bytes(&self.storage, span)
    }
}
