//! Rendering Context
//!
//! The driver-facing half of the backend. Producers request resources here
//! and get ids back immediately; the driver objects are created on the next
//! [`display`](RenderingContext::display), before anything of that frame is
//! drawn.
//!
//! ```text
//! display(frame)
//!   ├─ construct()              pending resource requests → driver objects
//!   ├─ execute(entry point)     replay opcodes, recursing into nested buffers
//!   │    └─ draw
//!   │         ├─ merged states  → PipelineState (redundant values dropped)
//!   │         ├─ dirty bits     → driver setters
//!   │         ├─ features       → permutation lookup / compile on miss
//!   │         └─ uniforms       → uploaded from software constant buffers
//!   ├─ reset pipeline state
//!   ├─ present
//!   └─ frame.clear()
//! ```

use std::sync::Arc;

use log::{debug, error, trace};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{RenderError, Result};
use crate::renderer::commands::{DrawCall, OpCode, ResourceCommandBuffer};
use crate::renderer::frame::{CommandBufferId, RenderFrame, SpanStorage};
use crate::renderer::pipeline::feature_layout::{PipelineFeatureLayout, PipelineFeatures};
use crate::renderer::pipeline::pipeline_state::{PipelineState, STATE_BIT_COUNT};
use crate::renderer::pipeline::shader_library::{
    ConstantBufferPreprocessor, ProgramDescriptor, ShaderLibrary, ShaderPrecisionPreprocessor,
    ShaderVersionPreprocessor,
};
use crate::renderer::resource_ids::{
    ConstantBufferId, FeatureLayoutId, IdentifierPool, IndexBufferId, InputLayoutId, ProgramId,
    ResourceId, ResourceIdentifiers, ResourceKind, ResourceTable, TextureId, UniformLayoutId,
    VertexBufferId,
};
use crate::renderer::settings::RenderSettings;
use crate::renderer::state::{
    MAX_CONSTANT_BUFFERS, State, StateMask, TEXTURE_BIT_OFFSET,
};
use crate::renderer::types::{
    CubeMapSide, NormalizedViewport, PixelFormat, ShaderStage, TextureDesc, TextureType,
};
use crate::renderer::uniform_layout::{
    UniformBufferLayout, UniformElement, UniformLayouts, UniformValue, uniform_name_hash,
};
use crate::renderer::vertex_format::{VertexBufferLayout, VertexFormat};

use super::driver::{
    ActiveUniform, BufferHandle, BufferKind, Driver, DriverError, ProgramHandle, TextureHandle,
};
use super::framebuffer_cache::{FramebufferCache, FramebufferKey};
use super::permutation_cache::{BufferRevision, Permutation, PermutationCache, PermutationUniform};
use super::transient_pool::{TextureKey, TransientTexturePool};
use super::transient_stack::TransientResourceStack;

/// Depth attachment format of render-to-texture framebuffers.
const FRAMEBUFFER_DEPTH_FORMAT: PixelFormat = PixelFormat::D24X8;

/// Execution statistics.
///
/// The first five fields are per frame and cleared by
/// [`RenderingContext::reset_frame_counters`]; the rest accumulate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderCounters {
    pub draw_calls: u64,
    /// Driver state setters issued for dirty state bits.
    pub state_changes: u64,
    pub permutations_compiled: u64,
    pub permutation_cache_hits: u64,
    pub uniforms_uploaded: u64,
    pub textures_allocated: u64,
    pub framebuffers_allocated: u64,
    pub frames_displayed: u64,
}

/// Software storage of a constant buffer.
#[derive(Debug)]
struct ConstantBuffer {
    layout: Arc<UniformBufferLayout>,
    data: Vec<u8>,
    /// Bumped on every upload.
    revision: u64,
}

#[derive(Debug, Clone, Copy)]
struct TextureEntry {
    handle: TextureHandle,
    desc: TextureDesc,
}

pub struct RenderingContext<D: Driver> {
    driver: D,
    settings: RenderSettings,
    ids: ResourceIdentifiers,
    resource_commands: ResourceCommandBuffer,

    // === Resources ===
    input_layouts: ResourceTable<InputLayoutId, VertexBufferLayout>,
    input_layout_cache: FxHashMap<VertexFormat, InputLayoutId>,
    vertex_buffers: ResourceTable<VertexBufferId, BufferHandle>,
    index_buffers: ResourceTable<IndexBufferId, BufferHandle>,
    constant_buffers: ResourceTable<ConstantBufferId, ConstantBuffer>,
    textures: ResourceTable<TextureId, TextureEntry>,
    uniform_layouts: UniformLayouts,
    feature_layouts: ResourceTable<FeatureLayoutId, PipelineFeatureLayout>,
    programs: ResourceTable<ProgramId, ProgramDescriptor>,
    shader_library: ShaderLibrary,
    default_program: ProgramId,

    // === Execution state ===
    pipeline: PipelineState,
    active_input_layout: InputLayoutId,
    active_program: Option<ProgramHandle>,
    active_permutation: Option<(ProgramId, PipelineFeatures)>,
    /// Size of the bound render target, `None` for the surface.
    target_size: Option<(u32, u32)>,

    // === Caches ===
    permutations: PermutationCache,
    transient_stack: TransientResourceStack,
    transient_textures: TransientTexturePool,
    framebuffers: FramebufferCache,

    counters: RenderCounters,
}

impl<D: Driver> RenderingContext<D> {
    pub fn new(driver: D, settings: RenderSettings) -> Result<Self> {
        let mut shader_library = ShaderLibrary::new()?;
        shader_library.add_preprocessor(Box::new(ConstantBufferPreprocessor));
        shader_library.add_preprocessor(Box::new(ShaderVersionPreprocessor(settings.glsl_version)));
        if let Some(precision) = &settings.float_precision {
            shader_library.add_preprocessor(Box::new(ShaderPrecisionPreprocessor::new(precision.as_str(), "float")));
        }

        debug!(
            "Creating rendering context (GLSL {}, permutation cache {:?}, framebuffer cache {:?})",
            settings.glsl_version, settings.permutation_cache_capacity, settings.framebuffer_cache_capacity
        );

        Ok(Self {
            driver,
            ids: ResourceIdentifiers::default(),
            resource_commands: ResourceCommandBuffer::new(),
            input_layouts: ResourceTable::new(),
            input_layout_cache: FxHashMap::default(),
            vertex_buffers: ResourceTable::new(),
            index_buffers: ResourceTable::new(),
            constant_buffers: ResourceTable::new(),
            textures: ResourceTable::new(),
            uniform_layouts: UniformLayouts::new(),
            feature_layouts: ResourceTable::new(),
            programs: ResourceTable::new(),
            shader_library,
            default_program: ProgramId::INVALID,
            pipeline: PipelineState::new(),
            active_input_layout: InputLayoutId::INVALID,
            active_program: None,
            active_permutation: None,
            target_size: None,
            permutations: PermutationCache::new(settings.permutation_cache_capacity),
            transient_stack: TransientResourceStack::new(),
            transient_textures: TransientTexturePool::new(),
            framebuffers: FramebufferCache::new(settings.framebuffer_cache_capacity),
            counters: RenderCounters::default(),
            settings,
        })
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    #[must_use]
    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    #[must_use]
    pub fn shader_library(&self) -> &ShaderLibrary {
        &self.shader_library
    }

    #[must_use]
    pub fn counters(&self) -> &RenderCounters {
        &self.counters
    }

    pub fn reset_frame_counters(&mut self) {
        self.counters.draw_calls = 0;
        self.counters.state_changes = 0;
        self.counters.permutations_compiled = 0;
        self.counters.permutation_cache_hits = 0;
        self.counters.uniforms_uploaded = 0;
    }

    /// Finds a registered uniform layout by its type name.
    #[must_use]
    pub fn uniform_layout(&self, name: &str) -> Option<&UniformBufferLayout> {
        self.uniform_layouts.find(name)
    }

    #[must_use]
    pub fn pipeline_state(&self) -> &PipelineState {
        &self.pipeline
    }

    /// Driver buffer backing a constructed vertex buffer.
    pub fn vertex_buffer_handle(&self, id: VertexBufferId) -> Result<BufferHandle> {
        self.vertex_buffers.try_get(id).copied()
    }

    pub fn index_buffer_handle(&self, id: IndexBufferId) -> Result<BufferHandle> {
        self.index_buffers.try_get(id).copied()
    }

    pub fn texture_handle(&self, id: TextureId) -> Result<TextureHandle> {
        self.textures.try_get(id).map(|entry| entry.handle)
    }

    /// Current contents of a constructed constant buffer.
    pub fn constant_buffer_data(&self, id: ConstantBufferId) -> Result<&[u8]> {
        self.constant_buffers.try_get(id).map(|buffer| buffer.data.as_slice())
    }

    #[must_use]
    pub fn permutation_count(&self) -> usize {
        self.permutations.len()
    }

    /// Lifetime permutation cache hits and misses. Unlike
    /// [`RenderCounters`] these are never reset.
    #[must_use]
    pub fn permutation_cache_statistics(&self) -> (u64, u64) {
        (self.permutations.hits(), self.permutations.misses())
    }

    #[must_use]
    pub fn transient_texture_count(&self) -> usize {
        self.transient_textures.total_texture_count()
    }

    #[must_use]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Number of resource requests waiting for the next `display`.
    #[must_use]
    pub fn pending_resource_count(&self) -> usize {
        self.resource_commands.len()
    }

    // ─── Resource requests ────────────────────────────────────────────────────

    /// Returns the input layout of `format`, requesting it on first use.
    pub fn request_input_layout(&mut self, format: VertexFormat) -> Result<InputLayoutId> {
        let format = VertexFormat::new(format);
        if let Some(id) = self.input_layout_cache.get(&format) {
            return Ok(*id);
        }

        let id = self.ids.input_layouts.acquire()?;
        self.resource_commands.create_input_layout(id, format);
        self.input_layout_cache.insert(format, id);
        Ok(id)
    }

    pub fn request_vertex_buffer(&mut self, data: &[u8]) -> Result<VertexBufferId> {
        let id = self.ids.vertex_buffers.acquire()?;
        self.resource_commands.create_vertex_buffer(id, data);
        Ok(id)
    }

    /// `data` holds 16-bit indices.
    pub fn request_index_buffer(&mut self, data: &[u8]) -> Result<IndexBufferId> {
        let id = self.ids.index_buffers.acquire()?;
        self.resource_commands.create_index_buffer(id, data);
        Ok(id)
    }

    /// Requests a constant buffer of `layout`. `data` may be shorter than the
    /// layout; the rest is zeroed.
    pub fn request_constant_buffer(&mut self, data: &[u8], layout: UniformLayoutId) -> Result<ConstantBufferId> {
        self.uniform_layouts.get(layout)?;
        let id = self.ids.constant_buffers.acquire()?;
        self.resource_commands.create_constant_buffer(id, data, layout);
        Ok(id)
    }

    pub fn request_texture(&mut self, desc: TextureDesc, data: &[u8]) -> Result<TextureId> {
        let id = self.ids.textures.acquire()?;
        self.resource_commands.create_texture(id, desc, data);
        Ok(id)
    }

    pub fn request_texture_2d(&mut self, width: u16, height: u16, format: PixelFormat, data: &[u8]) -> Result<TextureId> {
        self.request_texture(TextureDesc::texture_2d(width, height, format), data)
    }

    pub fn request_texture_cube(&mut self, size: u16, format: PixelFormat, data: &[u8]) -> Result<TextureId> {
        self.request_texture(TextureDesc::cube(size, format), data)
    }

    /// Registers a constant buffer layout. Layouts are usable immediately.
    pub fn request_uniform_layout(&mut self, name: &str, elements: Vec<UniformElement>) -> Result<UniformLayoutId> {
        let id = self.ids.uniform_layouts.acquire()?;
        self.uniform_layouts.insert(id, UniformBufferLayout::new(name, elements));
        Ok(id)
    }

    /// Registers a feature layout from `(name, mask)` pairs.
    pub fn request_pipeline_feature_layout<S: AsRef<str>>(&mut self, features: &[(S, PipelineFeatures)]) -> Result<FeatureLayoutId> {
        let id = self.ids.feature_layouts.acquire()?;
        self.feature_layouts.insert(id, PipelineFeatureLayout::from_features(features));
        Ok(id)
    }

    /// Registers a program. Permutations are compiled on first use.
    pub fn request_program(&mut self, vertex: &str, fragment: &str) -> Result<ProgramId> {
        let descriptor = ProgramDescriptor {
            vertex: self.shader_library.add_vertex_shader(vertex)?,
            fragment: self.shader_library.add_fragment_shader(fragment)?,
        };
        let id = self.ids.programs.acquire()?;
        self.programs.insert(id, descriptor);
        Ok(id)
    }

    /// Registers a program from a combined `[VertexShader]` /
    /// `[FragmentShader]` source. Returns the invalid id when neither
    /// marker is present.
    pub fn request_shader_file(&mut self, text: &str) -> Result<ProgramId> {
        match ShaderLibrary::split_shader_file(text) {
            Some((vertex, fragment)) => self.request_program(&vertex, &fragment),
            None => Ok(ProgramId::INVALID),
        }
    }

    pub fn add_shader_include(&mut self, name: &str, code: &str) -> Result<()> {
        self.shader_library.add_include(name.to_owned(), code.to_owned())
    }

    pub fn delete_texture(&mut self, id: TextureId) -> Result<()> {
        ensure_allocated(&self.ids.textures, id)?;
        self.resource_commands.delete_texture(id);
        Ok(())
    }

    pub fn delete_constant_buffer(&mut self, id: ConstantBufferId) -> Result<()> {
        ensure_allocated(&self.ids.constant_buffers, id)?;
        self.resource_commands.delete_constant_buffer(id);
        Ok(())
    }

    pub fn delete_program(&mut self, id: ProgramId) -> Result<()> {
        ensure_allocated(&self.ids.programs, id)?;
        self.resource_commands.delete_program(id);
        Ok(())
    }

    /// Compiles a permutation during the next `display` instead of at its
    /// first draw.
    pub fn precompile_permutation(&mut self, program: ProgramId, features: PipelineFeatures, layout: FeatureLayoutId) {
        self.resource_commands.precompile_permutation(program, features, layout);
    }

    /// Program used by draws that bind none.
    pub fn set_default_program(&mut self, program: ProgramId) {
        self.default_program = program;
        self.active_permutation = None;
    }

    #[must_use]
    pub fn default_program(&self) -> ProgramId {
        self.default_program
    }

    /// Deletes pooled transient textures idle for more than
    /// `max_idle_frames` calls.
    pub fn trim_transient_textures(&mut self, max_idle_frames: u32) -> Result<()> {
        for id in self.transient_textures.trim(max_idle_frames) {
            self.destroy_texture(id)?;
        }
        Ok(())
    }

    /// Deletes every driver object owned by the context.
    ///
    /// Pending requests are constructed first, then all buffers, constant
    /// buffers, textures (pooled transient ones included), framebuffers and
    /// compiled permutations are released and their ids become invalid.
    /// Programs, layouts and shader sources stay registered; their
    /// permutations are compiled again on the next draw.
    pub fn release_resources(&mut self) -> Result<()> {
        let constructed = self.construct();

        for handle in self.permutations.drain() {
            self.driver.delete_program(handle);
        }
        self.driver.use_program(None);
        self.active_program = None;
        self.active_permutation = None;

        for handle in self.framebuffers.drain() {
            self.driver.delete_framebuffer(handle);
        }

        let pooled = self.transient_textures.drain();
        debug!(
            "Releasing {} textures ({} pooled), {} vertex and {} index buffers",
            self.textures.len(),
            pooled.len(),
            self.vertex_buffers.len(),
            self.index_buffers.len()
        );
        for (_, texture) in self.textures.drain() {
            self.driver.delete_texture(texture.handle);
        }
        for (_, handle) in self.vertex_buffers.drain() {
            self.driver.delete_buffer(handle);
        }
        for (_, handle) in self.index_buffers.drain() {
            self.driver.delete_buffer(handle);
        }
        self.constant_buffers.drain();

        self.ids.textures = IdentifierPool::new();
        self.ids.vertex_buffers = IdentifierPool::new();
        self.ids.index_buffers = IdentifierPool::new();
        self.ids.constant_buffers = IdentifierPool::new();

        self.pipeline.reset();
        self.transient_stack.reset();
        constructed
    }

    // ─── Frame lifecycle ──────────────────────────────────────────────────────

    /// Builds pending resources, executes `frame` and presents it.
    ///
    /// The frame is cleared afterwards, also when execution fails.
    pub fn display(&mut self, frame: &mut RenderFrame, wait: bool) -> Result<()> {
        let result = self
            .construct()
            .and_then(|()| self.execute(frame, frame.entry_point()));

        self.pipeline.reset();
        self.active_permutation = None;
        self.transient_stack.reset();
        self.target_size = None;

        if result.is_ok() {
            self.driver.present(wait);
            self.counters.frames_displayed += 1;
        }

        let (hits, misses) = self.permutation_cache_statistics();
        trace!(
            "Frame {}: {} draws, {} state changes, {} uniforms, {} bytes recorded, permutation cache {hits}/{misses}",
            self.counters.frames_displayed,
            self.counters.draw_calls,
            self.counters.state_changes,
            self.counters.uniforms_uploaded,
            frame.allocated_bytes()
        );

        frame.clear()?;
        result
    }

    /// Replays pending resource requests.
    pub fn construct(&mut self) -> Result<()> {
        if self.resource_commands.is_empty() {
            return Ok(());
        }

        debug!("Constructing {} pending resources", self.resource_commands.len());

        let mut commands = std::mem::take(&mut self.resource_commands);
        let result = commands
            .commands()
            .iter()
            .try_for_each(|command| self.execute_resource_command(command.opcode, &commands));
        commands.reset();
        self.resource_commands = commands;
        result
    }

    /// Runs one command buffer of `frame` in a fresh transient frame.
    pub fn execute(&mut self, frame: &RenderFrame, commands: CommandBufferId) -> Result<()> {
        self.transient_stack.push_frame()?;
        let result = self.execute_commands(frame, commands);
        let leaked = self.transient_stack.pop_frame();

        result?;
        for id in leaked? {
            self.transient_textures.release(id)?;
        }
        Ok(())
    }

    fn execute_commands(&mut self, frame: &RenderFrame, commands: CommandBufferId) -> Result<()> {
        for command in frame.command_buffer(commands)?.commands() {
            match command.opcode {
                OpCode::Clear {
                    color,
                    mask,
                    depth,
                    stencil,
                } => self.driver.clear(color, mask, depth, stencil),

                OpCode::Execute { commands } => self.execute(frame, commands)?,

                OpCode::UploadConstantBuffer { id, data } => {
                    let bytes = frame.allocator().bytes(data)?;
                    let buffer = self.constant_buffers.try_get_mut(id)?;
                    if buffer.data.len() < bytes.len() {
                        return Err(RenderError::ConstantBufferTooSmall {
                            id: id.raw(),
                            capacity: buffer.data.len(),
                            size: bytes.len(),
                        });
                    }
                    buffer.data[..bytes.len()].copy_from_slice(bytes);
                    buffer.revision += 1;
                }

                OpCode::UploadVertexBuffer { id, data } => {
                    let handle = *self.vertex_buffers.try_get(id)?;
                    self.driver.update_buffer(handle, frame.allocator().bytes(data)?)?;
                }

                OpCode::AcquireTexture { id, desc } => {
                    let texture = self.acquire_transient_texture(desc)?;
                    self.transient_stack.load(id, texture)?;
                }

                OpCode::ReleaseTexture { id } => {
                    let texture = self.transient_stack.unload(id)?;
                    self.transient_textures.release(texture)?;
                }

                OpCode::RenderToTexture {
                    id,
                    side,
                    viewport,
                    commands,
                } => self.render_to_texture(frame, id, side, viewport, commands)?,

                OpCode::RenderToTransientTexture {
                    id,
                    side,
                    viewport,
                    commands,
                } => {
                    let texture = self.transient_stack.get(id)?;
                    self.render_to_texture(frame, texture, side, viewport, commands)?;
                }

                OpCode::RenderToTarget { viewport, commands } => {
                    let previous = self.driver.viewport();
                    let (width, height) = self.current_target_size();
                    self.driver.set_viewport(viewport.denormalize(width, height));
                    let result = self.execute(frame, commands);
                    self.driver.set_viewport(previous);
                    result?;
                }

                OpCode::DrawIndexed(call) => self.draw(frame, &call, true)?,

                OpCode::DrawPrimitives(call) => self.draw(frame, &call, false)?,

                resource => self.execute_resource_command(resource, frame.allocator())?,
            }
        }
        Ok(())
    }

    // ─── Resource construction ────────────────────────────────────────────────

    fn execute_resource_command(&mut self, opcode: OpCode, storage: &dyn SpanStorage) -> Result<()> {
        match opcode {
            OpCode::CreateInputLayout { id, format } => {
                debug!("Creating input layout {id} for {format:?}");
                self.input_layouts.insert(id, VertexBufferLayout::from_format(format));
            }

            OpCode::CreateVertexBuffer { id, data } => {
                let bytes = storage.bytes(data)?;
                debug!("Creating vertex buffer {id} ({} bytes)", bytes.len());
                let handle = self.driver.create_buffer(BufferKind::Vertex, bytes)?;
                self.vertex_buffers.insert(id, handle);
            }

            OpCode::CreateIndexBuffer { id, data } => {
                let bytes = storage.bytes(data)?;
                debug!("Creating index buffer {id} ({} bytes)", bytes.len());
                let handle = self.driver.create_buffer(BufferKind::Index, bytes)?;
                self.index_buffers.insert(id, handle);
            }

            OpCode::CreateConstantBuffer { id, data, layout } => {
                let layout = Arc::clone(self.uniform_layouts.get(layout)?);
                let bytes = storage.bytes(data)?;
                let mut contents = vec![0; layout.byte_size().max(bytes.len())];
                contents[..bytes.len()].copy_from_slice(bytes);
                debug!("Creating constant buffer {id} of layout '{}'", layout.name());
                self.constant_buffers.insert(
                    id,
                    ConstantBuffer {
                        layout,
                        data: contents,
                        revision: 0,
                    },
                );
            }

            OpCode::CreateTexture { id, desc, data } => {
                debug!("Creating {} texture {id} of size {}x{}", desc.ty, desc.width, desc.height);
                let handle = self.driver.create_texture(&desc, storage.bytes(data)?)?;
                self.textures.insert(id, TextureEntry { handle, desc });
            }

            OpCode::DeleteTexture(id) => {
                if self.transient_textures.is_leased(id) {
                    return Err(RenderError::InvalidResource {
                        kind: ResourceKind::Texture,
                        id: id.raw(),
                    });
                }
                if self.transient_textures.forget(id) {
                    debug!("Deleting pooled transient texture {id}");
                }
                self.destroy_texture(id)?;
            }

            OpCode::DeleteConstantBuffer(id) => {
                self.constant_buffers.remove(id);
                self.pipeline.reset_constant_buffer(id);
                self.permutations.forget_constant_buffer(id);
                self.ids.constant_buffers.release(id)?;
            }

            OpCode::DeleteProgram(id) => {
                self.pipeline.reset_program(id);
                for handle in self.permutations.remove_program(id) {
                    self.delete_driver_program(handle);
                }
                self.programs.remove(id);
                if self.default_program == id {
                    self.default_program = ProgramId::INVALID;
                }
                self.active_permutation = None;
                self.ids.programs.release(id)?;
            }

            OpCode::PrecompilePermutation {
                program,
                features,
                layout,
            } => {
                let features = if layout.is_valid() {
                    features & self.feature_layouts.try_get(layout)?.mask()
                } else {
                    0
                };
                if !self.permutations.contains(program, features) {
                    match self.compile_permutation(program, features, layout) {
                        Ok(permutation) => self.cache_permutation(program, features, permutation),
                        Err(error @ (RenderError::ShaderCompilation { .. } | RenderError::ProgramLink { .. })) => {
                            error!("{error}");
                        }
                        Err(error) => return Err(error),
                    }
                }
            }

            other => {
                debug!("Ignoring {} in a resource construction pass", other.name());
            }
        }
        Ok(())
    }

    fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        let entry = self.textures.remove(id).ok_or(RenderError::InvalidResource {
            kind: ResourceKind::Texture,
            id: id.raw(),
        })?;
        self.driver.delete_texture(entry.handle);
        self.pipeline.reset_texture(id);
        self.ids.textures.release(id)
    }

    fn acquire_transient_texture(&mut self, desc: TextureDesc) -> Result<TextureId> {
        let Self {
            transient_textures,
            ids,
            textures,
            driver,
            counters,
            ..
        } = self;

        transient_textures.acquire_with(TextureKey::from_desc(&desc), |_| {
            let id = ids.textures.acquire()?;
            let handle = match driver.create_texture(&desc, &[]) {
                Ok(handle) => handle,
                Err(error) => {
                    ids.textures.release(id)?;
                    return Err(error.into());
                }
            };
            textures.insert(id, TextureEntry { handle, desc });
            counters.textures_allocated += 1;
            Ok(id)
        })
    }

    // ─── Render targets ───────────────────────────────────────────────────────

    fn current_target_size(&self) -> (u32, u32) {
        self.target_size.unwrap_or_else(|| self.driver.surface_size())
    }

    fn render_to_texture(
        &mut self,
        frame: &RenderFrame,
        texture: TextureId,
        side: Option<CubeMapSide>,
        viewport: NormalizedViewport,
        commands: CommandBufferId,
    ) -> Result<()> {
        let TextureEntry { handle, desc } = *self.textures.try_get(texture)?;
        if side.is_some() != (desc.ty == TextureType::Cube) {
            return Err(RenderError::UnsupportedFormat {
                format: desc.format,
                usage: if side.is_some() {
                    "a cube map render target"
                } else {
                    "a 2D render target"
                },
            });
        }

        let previous_viewport = self.driver.viewport();
        let previous_framebuffer = self.driver.bound_framebuffer();
        let previous_size = self.target_size;

        let key = FramebufferKey {
            width: desc.width,
            height: desc.height,
            depth_format: FRAMEBUFFER_DEPTH_FORMAT,
        };
        let Self {
            framebuffers,
            driver,
            counters,
            ..
        } = self;
        let framebuffer = framebuffers.acquire_with(key, |key| {
            counters.framebuffers_allocated += 1;
            Ok(driver.create_framebuffer(key.width, key.height, key.depth_format)?)
        })?;

        self.driver.bind_framebuffer(Some(framebuffer));
        let result = self
            .driver
            .attach_color(handle, side)
            .map_err(RenderError::from)
            .and_then(|()| {
                let size = (u32::from(desc.width), u32::from(desc.height));
                self.target_size = Some(size);
                self.driver.set_viewport(viewport.denormalize(size.0, size.1));
                self.execute(frame, commands)
            });

        for evicted in self.framebuffers.release(framebuffer) {
            self.driver.delete_framebuffer(evicted);
        }
        self.driver.bind_framebuffer(previous_framebuffer);
        self.driver.set_viewport(previous_viewport);
        self.target_size = previous_size;
        result
    }

    // ─── Draws ────────────────────────────────────────────────────────────────

    fn draw(&mut self, frame: &RenderFrame, call: &DrawCall, indexed: bool) -> Result<()> {
        let block = frame.compiled_block(call.state_block)?;

        self.pipeline.begin_state_block();
        for state in &block.states {
            let state = match *state {
                State::BindTransientTexture { id, sampler } => State::BindTexture {
                    id: self.transient_stack.get(id)?,
                    sampler,
                },
                other => other,
            };
            self.activate_state_features(state)?;
            self.pipeline.apply(state);
        }
        self.pipeline.activate_features(block.features);
        self.end_state_block()?;

        let dirty = self.pipeline.take_dirty();
        self.flush_states(dirty)?;

        self.apply_permutation()?;

        if indexed {
            self.driver.draw_indexed(call.primitives, call.first, call.count);
        } else {
            self.driver.draw_arrays(call.primitives, call.first, call.count);
        }
        self.counters.draw_calls += 1;
        Ok(())
    }

    /// Adds the features implied by one state of the draw's own block.
    ///
    /// Bindings left over from earlier draws never contribute, so the
    /// permutation of a draw does not depend on what was drawn before it.
    fn activate_state_features(&mut self, state: State) -> Result<()> {
        match state {
            State::SetInputLayout(id) if id.is_valid() => {
                let features = self.input_layouts.try_get(id)?.features;
                self.pipeline.activate_vertex_attributes(features);
            }
            State::BindTexture { id, sampler } if id.is_valid() => {
                self.pipeline.activate_sampler(sampler)?;
            }
            State::BindConstantBuffer { id, slot } if id.is_valid() => {
                self.pipeline.activate_constant_buffer(slot)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Masks the collected features with the bound feature layout.
    fn end_state_block(&mut self) -> Result<()> {
        let feature_layout = self.pipeline.feature_layout();
        let mask = if feature_layout.is_valid() {
            self.feature_layouts.try_get(feature_layout)?.mask()
        } else {
            0
        };
        self.pipeline.end_state_block(mask);
        Ok(())
    }

    /// Issues the driver calls of every dirty state bit.
    fn flush_states(&mut self, dirty: StateMask) -> Result<()> {
        for bit in 0..STATE_BIT_COUNT as u32 {
            if dirty & (1 << bit) == 0 {
                continue;
            }
            match self.pipeline.state(bit) {
                Some(state) => self.issue_state(state)?,
                None => self.unbind_state(bit),
            }
        }
        Ok(())
    }

    fn issue_state(&mut self, state: State) -> Result<()> {
        match state {
            State::BindVertexBuffer(id) => {
                let handle = self.optional(id.is_valid(), || self.vertex_buffers.try_get(id).copied())?;
                self.driver.bind_vertex_buffer(handle);
            }
            State::BindIndexBuffer(id) => {
                let handle = self.optional(id.is_valid(), || self.index_buffers.try_get(id).copied())?;
                self.driver.bind_index_buffer(handle);
            }
            State::SetInputLayout(id) => {
                self.switch_input_layout(id)?;
            }
            State::SetFeatureLayout(_) | State::BindProgram(_) | State::BindConstantBuffer { .. } => {
                return Ok(());
            }
            State::Blending(_) => {
                self.driver.set_blending(state.source_blend_factor(), state.dest_blend_factor());
            }
            State::PolygonOffset { .. } => {
                self.driver
                    .set_polygon_offset(state.polygon_offset_factor(), state.polygon_offset_units());
            }
            State::DepthState { function, write } => self.driver.set_depth_state(function, write),
            State::AlphaTest { function, .. } => {
                self.driver.set_alpha_test(function, state.alpha_reference());
            }
            State::CullFace(face) => self.driver.set_cull_face(face),
            State::Rasterization(mode) => self.driver.set_rasterization(mode),
            State::StencilOp {
                stencil_fail,
                depth_fail,
                pass,
            } => self.driver.set_stencil_op(stencil_fail, depth_fail, pass),
            State::StencilFunc {
                function,
                reference,
                mask,
            } => self.driver.set_stencil_func(function, reference, mask),
            State::StencilMask(mask) => self.driver.set_stencil_mask(mask),
            State::ColorMask(mask) => self.driver.set_color_mask(mask),
            State::BindTexture { id, sampler } => {
                let handle = self.optional(id.is_valid(), || self.texture_handle(id))?;
                self.driver.bind_texture(sampler, handle);
            }
            State::BindTransientTexture { id, sampler } => {
                let texture = self.transient_stack.get(id)?;
                let handle = self.texture_handle(texture)?;
                self.driver.bind_texture(sampler, Some(handle));
            }
        }
        self.counters.state_changes += 1;
        Ok(())
    }

    fn optional<T>(&self, valid: bool, resolve: impl FnOnce() -> Result<T>) -> Result<Option<T>> {
        if valid { resolve().map(Some) } else { Ok(None) }
    }

    fn unbind_state(&mut self, bit: u32) {
        if bit >= TEXTURE_BIT_OFFSET {
            self.driver.bind_texture((bit - TEXTURE_BIT_OFFSET) as u8, None);
        } else if bit == State::BindVertexBuffer(VertexBufferId::INVALID).bit() {
            self.driver.bind_vertex_buffer(None);
        } else if bit == State::BindIndexBuffer(IndexBufferId::INVALID).bit() {
            self.driver.bind_index_buffer(None);
        } else if bit == State::SetInputLayout(InputLayoutId::INVALID).bit() {
            if let Some(layout) = self.input_layouts.get(self.active_input_layout) {
                self.driver.disable_input_layout(layout);
            }
            self.active_input_layout = InputLayoutId::INVALID;
        } else {
            return;
        }
        self.counters.state_changes += 1;
    }

    fn switch_input_layout(&mut self, id: InputLayoutId) -> Result<()> {
        if let Some(previous) = self.input_layouts.get(self.active_input_layout) {
            self.driver.disable_input_layout(previous);
        }
        if id.is_valid() {
            let layout = self.input_layouts.try_get(id)?;
            self.driver.enable_input_layout(layout);
        }
        self.active_input_layout = id;
        Ok(())
    }

    // ─── Permutations ─────────────────────────────────────────────────────────

    fn apply_permutation(&mut self) -> Result<()> {
        let bound = self.pipeline.program();
        let program = if bound.is_valid() {
            bound
        } else if self.default_program.is_valid() {
            self.default_program
        } else {
            return Err(RenderError::NoProgram);
        };
        let features = self.pipeline.features();
        let key = (program, features);

        if !self.pipeline.changes().is_empty() || self.active_permutation != Some(key) {
            let handle = self.resolve_permutation(program, features)?;
            if self.active_program != Some(handle) {
                self.driver.use_program(Some(handle));
                self.active_program = Some(handle);
            }
            self.active_permutation = Some(key);
            self.pipeline.accept_changes();
        }

        self.upload_uniforms(program, features)
    }

    fn resolve_permutation(&mut self, program: ProgramId, features: PipelineFeatures) -> Result<ProgramHandle> {
        if let Some(permutation) = self.permutations.get(program, features) {
            self.counters.permutation_cache_hits += 1;
            return Ok(permutation.program);
        }

        let layout = self.pipeline.feature_layout();
        let permutation = match self.compile_permutation(program, features, layout) {
            Ok(permutation) => permutation,
            Err(error @ (RenderError::ShaderCompilation { .. } | RenderError::ProgramLink { .. })) => {
                error!("{error}");
                return Err(RenderError::NoValidPermutation {
                    program: program.raw(),
                    features,
                });
            }
            Err(error) => return Err(error),
        };

        let handle = permutation.program;
        self.cache_permutation(program, features, permutation);
        Ok(handle)
    }

    fn cache_permutation(&mut self, program: ProgramId, features: PipelineFeatures, permutation: Permutation) {
        for evicted in self.permutations.insert(program, features, permutation) {
            debug!("Evicting a permutation of program {program}");
            self.delete_driver_program(evicted);
            self.active_permutation = None;
        }
    }

    fn delete_driver_program(&mut self, handle: ProgramHandle) {
        if self.active_program == Some(handle) {
            self.active_program = None;
        }
        self.driver.delete_program(handle);
    }

    fn compile_permutation(
        &mut self,
        program: ProgramId,
        features: PipelineFeatures,
        layout: FeatureLayoutId,
    ) -> Result<Permutation> {
        let descriptor = *self.programs.try_get(program)?;
        let feature_layout = if layout.is_valid() {
            Some(self.feature_layouts.try_get(layout)?)
        } else {
            None
        };
        let sources = self.shader_library.generate_shader_code(
            &descriptor,
            features,
            feature_layout,
            &self.uniform_layouts,
        )?;

        let vertex = self
            .driver
            .compile_shader(ShaderStage::Vertex, &sources.vertex)
            .map_err(shader_error)?;
        let fragment = match self.driver.compile_shader(ShaderStage::Fragment, &sources.fragment) {
            Ok(fragment) => fragment,
            Err(error) => {
                self.driver.delete_shader(vertex);
                return Err(shader_error(error));
            }
        };
        let linked = self.driver.link_program(vertex, fragment);
        self.driver.delete_shader(vertex);
        self.driver.delete_shader(fragment);
        let handle = linked.map_err(shader_error)?;

        self.counters.permutations_compiled += 1;
        debug!(
            "Compiled permutation {features:#x} of program {program} (source {:016x})",
            sources.fingerprint()
        );

        let uniforms = self
            .driver
            .active_uniforms(handle)
            .into_iter()
            .filter_map(permutation_uniform)
            .collect::<SmallVec<_>>();
        Ok(Permutation::new(handle, uniforms))
    }

    /// Writes the uniforms of the active permutation from the constant
    /// buffers bound to their slots.
    fn upload_uniforms(&mut self, program: ProgramId, features: PipelineFeatures) -> Result<()> {
        let Some(permutation) = self.permutations.find_mut(program, features) else {
            return Ok(());
        };
        let caching = self.settings.uniform_caching;
        let mut uploaded: SmallVec<[(u8, BufferRevision); MAX_CONSTANT_BUFFERS]> = SmallVec::new();

        for uniform in &permutation.uniforms {
            let id = self.pipeline.constant_buffer(uniform.slot);
            if !id.is_valid() {
                continue;
            }
            let buffer = self.constant_buffers.try_get(id)?;
            let revision = BufferRevision {
                id,
                value: buffer.revision,
            };
            if caching && permutation.revisions[usize::from(uniform.slot)] == Some(revision) {
                continue;
            }

            let element = buffer
                .layout
                .find(uniform.name_hash)
                .ok_or_else(|| RenderError::UnknownUniform {
                    name: uniform.name.clone(),
                })?;
            let count = usize::from(uniform.array_size);
            let value = buffer
                .data
                .get(element.offset..)
                .and_then(|bytes| UniformValue::decode(uniform.ty, bytes, count))
                .ok_or(RenderError::ConstantBufferTooSmall {
                    id: id.raw(),
                    capacity: buffer.data.len(),
                    size: element.offset + uniform.ty.size_of() * count.max(1),
                })?;

            self.driver.set_uniform(uniform.location, &value);
            self.counters.uniforms_uploaded += 1;
            uploaded.push((uniform.slot, revision));
        }

        for (slot, revision) in uploaded {
            permutation.revisions[usize::from(slot)] = Some(revision);
        }
        Ok(())
    }
}

impl<D: Driver> Drop for RenderingContext<D> {
    fn drop(&mut self) {
        if let Err(error) = self.release_resources() {
            error!("Failed to construct pending resources while dropping the context: {error}");
        }
    }
}

/// Maps a `cb_N.field` uniform onto constant buffer slot `N`.
fn permutation_uniform(uniform: ActiveUniform) -> Option<PermutationUniform> {
    let Some((slot, field)) = uniform
        .name
        .strip_prefix("cb_")
        .and_then(|rest| rest.split_once('.'))
    else {
        trace!("Uniform '{}' is not backed by a constant buffer", uniform.name);
        return None;
    };
    let slot: u8 = slot.parse().ok().filter(|&slot| usize::from(slot) < MAX_CONSTANT_BUFFERS)?;
    let field = field.split('[').next().unwrap_or(field);

    Some(PermutationUniform {
        name: field.to_owned(),
        location: uniform.location,
        ty: uniform.ty,
        array_size: uniform.array_size,
        slot,
        name_hash: uniform_name_hash(field),
    })
}

fn ensure_allocated<T: ResourceId>(pool: &IdentifierPool<T>, id: T) -> Result<()> {
    if pool.is_allocated(id) {
        Ok(())
    } else {
        Err(RenderError::InvalidResource {
            kind: T::KIND,
            id: ResourceId::raw(id),
        })
    }
}

fn shader_error(error: DriverError) -> RenderError {
    match error {
        DriverError::Compile { stage, diagnostics } => RenderError::ShaderCompilation { stage, diagnostics },
        DriverError::Link { diagnostics } => RenderError::ProgramLink { diagnostics },
        other => RenderError::Driver(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::uniform_layout::UniformType;

    fn active(name: &str, ty: UniformType) -> ActiveUniform {
        ActiveUniform {
            name: name.to_owned(),
            ty,
            location: 3,
            array_size: 1,
        }
    }

    #[test]
    fn test_uniform_slot_mapping() {
        let uniform = permutation_uniform(active("cb_2.transform", UniformType::Matrix4)).unwrap();
        assert_eq!(uniform.slot, 2);
        assert_eq!(uniform.name, "transform");
        assert_eq!(uniform.name_hash, uniform_name_hash("transform"));

        let array = permutation_uniform(active("cb_0.lights[0]", UniformType::Vec4)).unwrap();
        assert_eq!(array.name, "lights");
    }

    #[test]
    fn test_non_buffer_uniforms_are_skipped() {
        assert!(permutation_uniform(active("u_time", UniformType::Float)).is_none());
        assert!(permutation_uniform(active("cb_9.color", UniformType::Vec4)).is_none());
        assert!(permutation_uniform(active("cb_x.color", UniformType::Vec4)).is_none());
    }

    #[test]
    fn test_shader_error_mapping() {
        let error = shader_error(DriverError::Compile {
            stage: ShaderStage::Fragment,
            diagnostics: "0:3: error".to_owned(),
        });
        assert!(matches!(
            error,
            RenderError::ShaderCompilation {
                stage: ShaderStage::Fragment,
                ..
            }
        ));
        assert!(matches!(
            shader_error(DriverError::Unsupported("x".to_owned())),
            RenderError::Driver(_)
        ));
    }
}
