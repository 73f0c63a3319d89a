//! Headless Driver
//!
//! A [`Driver`] that keeps every object in memory. Buffers and textures store
//! their bytes, framebuffer and viewport bindings behave like a real device,
//! and every call is counted in [`DriverCalls`]. Draws are recorded together
//! with the bindings they saw, which makes the driver usable both as a
//! software backend for tooling and as the test double of the context.
//!
//! Shader handling:
//! - any source containing the failure marker (default `#error`) fails to
//!   compile, with the offending line in the diagnostics
//! - linked programs report one uniform per field of every
//!   `struct T { .. }; uniform T cb_N;` declaration, named `cb_N.field`

use glam::Vec4;
use log::trace;
use rustc_hash::FxHashMap;

use crate::renderer::state::MAX_TEXTURE_SAMPLERS;
use crate::renderer::types::{
    BlendFactor, ClearMask, ColorMask, Compare, CubeMapSide, PixelFormat, PolygonMode,
    PrimitiveType, ShaderStage, StencilAction, TextureDesc, TriangleFace, Viewport,
};
use crate::renderer::uniform_layout::{UniformType, UniformValue};
use crate::renderer::vertex_format::VertexBufferLayout;

use super::driver::{
    ActiveUniform, BufferHandle, BufferKind, Driver, DriverError, FramebufferHandle, ProgramHandle,
    ShaderHandle, TextureHandle,
};

/// Default marker that makes a shader stage fail to compile.
pub const DEFAULT_FAILURE_MARKER: &str = "#error";

/// Number of calls per driver entry point group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverCalls {
    pub buffers_created: usize,
    pub buffers_deleted: usize,
    pub buffer_updates: usize,
    pub textures_created: usize,
    pub textures_deleted: usize,
    pub shaders_compiled: usize,
    pub programs_linked: usize,
    pub programs_deleted: usize,
    pub program_binds: usize,
    pub uniform_writes: usize,
    pub framebuffers_created: usize,
    pub framebuffer_binds: usize,
    /// Binding and fixed-function setter calls.
    pub state_changes: usize,
    pub clears: usize,
    pub draws: usize,
    pub presents: usize,
}

/// Fixed-function values last set on the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterState {
    pub alpha_test: (Compare, f32),
    pub polygon_offset: (f32, f32),
    pub rasterization: PolygonMode,
    pub blending: (BlendFactor, BlendFactor),
    pub color_mask: ColorMask,
    pub depth: (Compare, bool),
    pub cull_face: TriangleFace,
    pub stencil_op: (StencilAction, StencilAction, StencilAction),
    pub stencil_func: (Compare, u8, u8),
    pub stencil_mask: u8,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            alpha_test: (Compare::Disabled, 0.0),
            polygon_offset: (0.0, 0.0),
            rasterization: PolygonMode::Fill,
            blending: (BlendFactor::Disabled, BlendFactor::Disabled),
            color_mask: ColorMask::ALL,
            depth: (Compare::Less, true),
            cull_face: TriangleFace::None,
            stencil_op: (StencilAction::Keep, StencilAction::Keep, StencilAction::Keep),
            stencil_func: (Compare::Disabled, 0, 0xFF),
            stencil_mask: 0xFF,
        }
    }
}

/// A draw call as the driver saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub indexed: bool,
    pub primitives: PrimitiveType,
    pub first: u32,
    pub count: u32,
    pub program: Option<ProgramHandle>,
    pub vertex_buffer: Option<BufferHandle>,
    pub index_buffer: Option<BufferHandle>,
    pub textures: [Option<TextureHandle>; MAX_TEXTURE_SAMPLERS],
    pub framebuffer: Option<FramebufferHandle>,
    pub viewport: Viewport,
    pub raster: RasterState,
}

#[derive(Debug)]
struct HeadlessBuffer {
    kind: BufferKind,
    data: Vec<u8>,
}

#[derive(Debug)]
struct HeadlessTexture {
    desc: TextureDesc,
    data: Vec<u8>,
}

#[derive(Debug)]
struct HeadlessShader {
    stage: ShaderStage,
    source: String,
}

#[derive(Debug)]
struct HeadlessProgram {
    uniforms: Vec<ActiveUniform>,
    values: FxHashMap<i32, UniformValue>,
}

/// Size and attachments of a headless framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessFramebuffer {
    pub width: u16,
    pub height: u16,
    pub depth_format: PixelFormat,
    pub color: Option<(TextureHandle, Option<CubeMapSide>)>,
}

#[derive(Debug)]
pub struct HeadlessDriver {
    surface: (u32, u32),
    failure_marker: String,
    next_handle: u32,

    buffers: FxHashMap<BufferHandle, HeadlessBuffer>,
    textures: FxHashMap<TextureHandle, HeadlessTexture>,
    shaders: FxHashMap<ShaderHandle, HeadlessShader>,
    programs: FxHashMap<ProgramHandle, HeadlessProgram>,
    framebuffers: FxHashMap<FramebufferHandle, HeadlessFramebuffer>,

    vertex_buffer: Option<BufferHandle>,
    index_buffer: Option<BufferHandle>,
    input_layout: Option<VertexBufferLayout>,
    bound_textures: [Option<TextureHandle>; MAX_TEXTURE_SAMPLERS],
    program: Option<ProgramHandle>,
    framebuffer: Option<FramebufferHandle>,
    viewport: Viewport,
    raster: RasterState,

    draws: Vec<RecordedDraw>,
    calls: DriverCalls,
}

impl HeadlessDriver {
    /// Creates a driver with a `width` x `height` surface.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: (width, height),
            failure_marker: DEFAULT_FAILURE_MARKER.to_owned(),
            next_handle: 0,
            buffers: FxHashMap::default(),
            textures: FxHashMap::default(),
            shaders: FxHashMap::default(),
            programs: FxHashMap::default(),
            framebuffers: FxHashMap::default(),
            vertex_buffer: None,
            index_buffer: None,
            input_layout: None,
            bound_textures: [None; MAX_TEXTURE_SAMPLERS],
            program: None,
            framebuffer: None,
            viewport: Viewport::new(0, 0, width, height),
            raster: RasterState::default(),
            draws: Vec::new(),
            calls: DriverCalls::default(),
        }
    }

    #[must_use]
    pub fn with_failure_marker(mut self, marker: impl Into<String>) -> Self {
        self.failure_marker = marker.into();
        self
    }

    fn next_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    // ─── Inspection ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn calls(&self) -> &DriverCalls {
        &self.calls
    }

    #[must_use]
    pub fn draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    /// Forgets recorded draws and call counts. Objects are kept.
    pub fn reset_statistics(&mut self) {
        self.draws.clear();
        self.calls = DriverCalls::default();
    }

    #[must_use]
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    #[must_use]
    pub fn buffer_kind(&self, buffer: BufferHandle) -> Option<BufferKind> {
        self.buffers.get(&buffer).map(|b| b.kind)
    }

    #[must_use]
    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        self.textures.get(&texture).map(|t| &t.desc)
    }

    #[must_use]
    pub fn texture_data(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&texture).map(|t| t.data.as_slice())
    }

    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    #[must_use]
    pub fn framebuffer(&self, framebuffer: FramebufferHandle) -> Option<&HeadlessFramebuffer> {
        self.framebuffers.get(&framebuffer)
    }

    #[must_use]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    #[must_use]
    pub fn bound_program(&self) -> Option<ProgramHandle> {
        self.program
    }

    #[must_use]
    pub fn input_layout(&self) -> Option<&VertexBufferLayout> {
        self.input_layout.as_ref()
    }

    #[must_use]
    pub fn raster(&self) -> &RasterState {
        &self.raster
    }

    /// Last value written to the uniform `name` of `program`.
    #[must_use]
    pub fn uniform(&self, program: ProgramHandle, name: &str) -> Option<&UniformValue> {
        let program = self.programs.get(&program)?;
        let location = program.uniforms.iter().find(|u| u.name == name)?.location;
        program.values.get(&location)
    }

    fn state_change(&mut self) {
        self.calls.state_changes += 1;
    }

    fn record_draw(&mut self, indexed: bool, primitives: PrimitiveType, first: u32, count: u32) {
        self.calls.draws += 1;
        self.draws.push(RecordedDraw {
            indexed,
            primitives,
            first,
            count,
            program: self.program,
            vertex_buffer: self.vertex_buffer,
            index_buffer: self.index_buffer,
            textures: self.bound_textures,
            framebuffer: self.framebuffer,
            viewport: self.viewport,
            raster: self.raster,
        });
    }
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

// ─── Source introspection ─────────────────────────────────────────────────────

/// Collects `cb_N.field` uniforms declared through constant buffer structs.
fn constant_buffer_uniforms(source: &str, uniforms: &mut Vec<(String, UniformType, u16)>) {
    let mut structs: FxHashMap<&str, Vec<(UniformType, &str, u16)>> = FxHashMap::default();
    let mut current: Option<(&str, Vec<(UniformType, &str, u16)>)> = None;

    for line in source.lines().map(str::trim) {
        if let Some(name) = line.strip_prefix("struct ") {
            current = Some((name.trim_end_matches('{').trim(), Vec::new()));
            continue;
        }

        let declaration = if let Some(rest) = line.strip_prefix('}') {
            if let Some((name, fields)) = current.take() {
                structs.insert(name, fields);
            }
            rest.trim_start_matches(';').trim()
        } else if let Some((_, fields)) = current.as_mut() {
            if let Some(field) = parse_field(line) {
                fields.push(field);
            }
            continue;
        } else {
            line
        };

        let Some(declaration) = declaration.strip_prefix("uniform ") else {
            continue;
        };
        let mut parts = declaration.trim_end_matches(';').split_whitespace();
        let (Some(ty), Some(instance)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Some(fields) = structs.get(ty) else {
            continue;
        };
        for (field_ty, field, array_size) in fields {
            let name = format!("{instance}.{field}");
            if !uniforms.iter().any(|(existing, ..)| *existing == name) {
                uniforms.push((name, *field_ty, *array_size));
            }
        }
    }
}

/// Parses `vec4 colors[4];` into its type, name and array length.
fn parse_field(line: &str) -> Option<(UniformType, &str, u16)> {
    let mut parts = line.trim_end_matches(';').split_whitespace();
    let ty = UniformType::from_glsl_name(parts.next()?)?;
    let declarator = parts.next()?;
    match declarator.split_once('[') {
        Some((name, size)) => Some((ty, name, size.trim_end_matches(']').parse().ok()?)),
        None => Some((ty, declarator, 0)),
    }
}

// ─── Driver ───────────────────────────────────────────────────────────────────

impl Driver for HeadlessDriver {
    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> Result<BufferHandle, DriverError> {
        let handle = BufferHandle(self.next_handle());
        self.buffers.insert(
            handle,
            HeadlessBuffer {
                kind,
                data: data.to_vec(),
            },
        );
        self.calls.buffers_created += 1;
        Ok(handle)
    }

    fn update_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), DriverError> {
        let target = self.buffers.get_mut(&buffer).ok_or(DriverError::UnknownHandle {
            kind: "buffer",
            handle: buffer.0,
        })?;
        if target.data.len() < data.len() {
            target.data.resize(data.len(), 0);
        }
        target.data[..data.len()].copy_from_slice(data);
        self.calls.buffer_updates += 1;
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_some() {
            self.calls.buffers_deleted += 1;
        }
        if self.vertex_buffer == Some(buffer) {
            self.vertex_buffer = None;
        }
        if self.index_buffer == Some(buffer) {
            self.index_buffer = None;
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: Option<BufferHandle>) {
        self.vertex_buffer = buffer;
        self.state_change();
    }

    fn bind_index_buffer(&mut self, buffer: Option<BufferHandle>) {
        self.index_buffer = buffer;
        self.state_change();
    }

    fn enable_input_layout(&mut self, layout: &VertexBufferLayout) {
        self.input_layout = Some(layout.clone());
        self.state_change();
    }

    fn disable_input_layout(&mut self, layout: &VertexBufferLayout) {
        if self.input_layout.as_ref() == Some(layout) {
            self.input_layout = None;
        }
        self.state_change();
    }

    fn create_texture(&mut self, desc: &TextureDesc, data: &[u8]) -> Result<TextureHandle, DriverError> {
        if desc.format == PixelFormat::D24X8 {
            return Err(DriverError::Unsupported(format!(
                "{} texture with a depth format",
                desc.ty
            )));
        }
        let handle = TextureHandle(self.next_handle());
        self.textures.insert(
            handle,
            HeadlessTexture {
                desc: *desc,
                data: data.to_vec(),
            },
        );
        self.calls.textures_created += 1;
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_some() {
            self.calls.textures_deleted += 1;
        }
        for bound in &mut self.bound_textures {
            if *bound == Some(texture) {
                *bound = None;
            }
        }
    }

    fn bind_texture(&mut self, sampler: u8, texture: Option<TextureHandle>) {
        if let Some(slot) = self.bound_textures.get_mut(usize::from(sampler)) {
            *slot = texture;
        }
        self.state_change();
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, DriverError> {
        self.calls.shaders_compiled += 1;

        if let Some(line) = source
            .lines()
            .position(|line| line.contains(self.failure_marker.as_str()))
        {
            return Err(DriverError::Compile {
                stage,
                diagnostics: format!("0:{}: '{}' : compilation terminated", line + 1, self.failure_marker),
            });
        }

        let handle = ShaderHandle(self.next_handle());
        self.shaders.insert(
            handle,
            HeadlessShader {
                stage,
                source: source.to_owned(),
            },
        );
        trace!("Compiled {stage} shader {}", handle.0);
        Ok(handle)
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
    }

    fn link_program(&mut self, vertex: ShaderHandle, fragment: ShaderHandle) -> Result<ProgramHandle, DriverError> {
        let (Some(vs), Some(fs)) = (self.shaders.get(&vertex), self.shaders.get(&fragment)) else {
            return Err(DriverError::Link {
                diagnostics: "attached shader does not exist".to_owned(),
            });
        };
        if vs.stage != ShaderStage::Vertex || fs.stage != ShaderStage::Fragment {
            return Err(DriverError::Link {
                diagnostics: "shader stages do not match their attachment points".to_owned(),
            });
        }

        let mut declared = Vec::new();
        constant_buffer_uniforms(&vs.source, &mut declared);
        constant_buffer_uniforms(&fs.source, &mut declared);

        let uniforms = declared
            .into_iter()
            .enumerate()
            .map(|(location, (name, ty, array_size))| ActiveUniform {
                name,
                ty,
                location: location as i32,
                array_size,
            })
            .collect();

        let handle = ProgramHandle(self.next_handle());
        self.programs.insert(
            handle,
            HeadlessProgram {
                uniforms,
                values: FxHashMap::default(),
            },
        );
        self.calls.programs_linked += 1;
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program).is_some() {
            self.calls.programs_deleted += 1;
        }
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.program = program;
        self.calls.program_binds += 1;
    }

    fn active_uniforms(&self, program: ProgramHandle) -> Vec<ActiveUniform> {
        self.programs
            .get(&program)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn set_uniform(&mut self, location: i32, value: &UniformValue) {
        self.calls.uniform_writes += 1;
        if let Some(program) = self.program.and_then(|p| self.programs.get_mut(&p)) {
            program.values.insert(location, value.clone());
        }
    }

    fn create_framebuffer(&mut self, width: u16, height: u16, depth_format: PixelFormat) -> Result<FramebufferHandle, DriverError> {
        let handle = FramebufferHandle(self.next_handle());
        self.framebuffers.insert(
            handle,
            HeadlessFramebuffer {
                width,
                height,
                depth_format,
                color: None,
            },
        );
        self.calls.framebuffers_created += 1;
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer);
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.framebuffer = framebuffer;
        self.calls.framebuffer_binds += 1;
    }

    fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.framebuffer
    }

    fn attach_color(&mut self, texture: TextureHandle, side: Option<CubeMapSide>) -> Result<(), DriverError> {
        let Some(handle) = self.framebuffer else {
            return Err(DriverError::Unsupported(
                "colour attachment without a bound framebuffer".to_owned(),
            ));
        };
        if !self.textures.contains_key(&texture) {
            return Err(DriverError::UnknownHandle {
                kind: "texture",
                handle: texture.0,
            });
        }
        if let Some(framebuffer) = self.framebuffers.get_mut(&handle) {
            framebuffer.color = Some((texture, side));
        }
        Ok(())
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    fn clear(&mut self, _color: Vec4, _mask: ClearMask, _depth: f32, _stencil: u8) {
        self.calls.clears += 1;
    }

    fn set_alpha_test(&mut self, function: Compare, reference: f32) {
        self.raster.alpha_test = (function, reference);
        self.state_change();
    }

    fn set_polygon_offset(&mut self, factor: f32, units: f32) {
        self.raster.polygon_offset = (factor, units);
        self.state_change();
    }

    fn set_rasterization(&mut self, mode: PolygonMode) {
        self.raster.rasterization = mode;
        self.state_change();
    }

    fn set_blending(&mut self, source: BlendFactor, destination: BlendFactor) {
        self.raster.blending = (source, destination);
        self.state_change();
    }

    fn set_color_mask(&mut self, mask: ColorMask) {
        self.raster.color_mask = mask;
        self.state_change();
    }

    fn set_depth_state(&mut self, function: Compare, write: bool) {
        self.raster.depth = (function, write);
        self.state_change();
    }

    fn set_cull_face(&mut self, face: TriangleFace) {
        self.raster.cull_face = face;
        self.state_change();
    }

    fn set_stencil_op(&mut self, stencil_fail: StencilAction, depth_fail: StencilAction, pass: StencilAction) {
        self.raster.stencil_op = (stencil_fail, depth_fail, pass);
        self.state_change();
    }

    fn set_stencil_func(&mut self, function: Compare, reference: u8, mask: u8) {
        self.raster.stencil_func = (function, reference, mask);
        self.state_change();
    }

    fn set_stencil_mask(&mut self, mask: u8) {
        self.raster.stencil_mask = mask;
        self.state_change();
    }

    fn draw_indexed(&mut self, primitives: PrimitiveType, first: u32, count: u32) {
        self.record_draw(true, primitives, first, count);
    }

    fn draw_arrays(&mut self, primitives: PrimitiveType, first: u32, count: u32) {
        self.record_draw(false, primitives, first, count);
    }

    fn present(&mut self, _wait: bool) {
        self.calls.presents += 1;
    }
}
