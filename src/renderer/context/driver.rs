//! Driver Interface
//!
//! [`Driver`] is the device seam of the rendering context: every call the
//! context makes against a graphics API goes through it. The context owns
//! its driver, so a backend is chosen once when the context is built and is
//! never reached through globals.
//!
//! Handles returned by a driver are opaque `u32` values. The context maps its
//! own resource ids to them, so a backend is free to use any numbering.

use glam::Vec4;
use thiserror::Error;

use crate::renderer::types::{
    BlendFactor, ClearMask, ColorMask, Compare, CubeMapSide, PixelFormat, PolygonMode,
    PrimitiveType, ShaderStage, StencilAction, TextureDesc, TriangleFace, Viewport,
};
use crate::renderer::uniform_layout::{UniformType, UniformValue};
use crate::renderer::vertex_format::VertexBufferLayout;

macro_rules! driver_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

driver_handle!(
    /// A vertex or index buffer object.
    BufferHandle
);
driver_handle!(TextureHandle);
driver_handle!(
    /// A compiled shader stage.
    ShaderHandle
);
driver_handle!(
    /// A linked program.
    ProgramHandle
);
driver_handle!(FramebufferHandle);

/// Target of a driver buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Failures reported by a driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// A shader stage was rejected by the compiler.
    #[error("{stage} shader compilation failed:\n{diagnostics}")]
    Compile {
        stage: ShaderStage,
        diagnostics: String,
    },

    /// Compiled stages could not be linked.
    #[error("Program link failed:\n{diagnostics}")]
    Link { diagnostics: String },

    /// A handle that the driver never issued, or already deleted.
    #[error("Unknown {kind} handle {handle}")]
    UnknownHandle { kind: &'static str, handle: u32 },

    /// The driver cannot create the requested object.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// A uniform reported by a linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUniform {
    /// Full uniform name, e.g. `cb_1.transform`.
    pub name: String,
    pub ty: UniformType,
    pub location: i32,
    /// Array length, `0` for a single value.
    pub array_size: u16,
}

/// Device interface consumed by the rendering context.
///
/// Binding setters take `Option` handles; `None` unbinds.
pub trait Driver {
    // ─── Buffers ──────────────────────────────────────────────────────────────

    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> Result<BufferHandle, DriverError>;

    /// Overwrites the start of `buffer` with `data`.
    fn update_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), DriverError>;

    fn delete_buffer(&mut self, buffer: BufferHandle);

    fn bind_vertex_buffer(&mut self, buffer: Option<BufferHandle>);

    fn bind_index_buffer(&mut self, buffer: Option<BufferHandle>);

    fn enable_input_layout(&mut self, layout: &VertexBufferLayout);

    fn disable_input_layout(&mut self, layout: &VertexBufferLayout);

    // ─── Textures ─────────────────────────────────────────────────────────────

    /// Creates a texture. `data` is empty for render targets.
    fn create_texture(&mut self, desc: &TextureDesc, data: &[u8]) -> Result<TextureHandle, DriverError>;

    fn delete_texture(&mut self, texture: TextureHandle);

    fn bind_texture(&mut self, sampler: u8, texture: Option<TextureHandle>);

    // ─── Programs ─────────────────────────────────────────────────────────────

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, DriverError>;

    fn delete_shader(&mut self, shader: ShaderHandle);

    fn link_program(&mut self, vertex: ShaderHandle, fragment: ShaderHandle) -> Result<ProgramHandle, DriverError>;

    fn delete_program(&mut self, program: ProgramHandle);

    fn use_program(&mut self, program: Option<ProgramHandle>);

    fn active_uniforms(&self, program: ProgramHandle) -> Vec<ActiveUniform>;

    /// Writes a uniform of the program in use.
    fn set_uniform(&mut self, location: i32, value: &UniformValue);

    // ─── Framebuffers ─────────────────────────────────────────────────────────

    /// Creates a framebuffer with a depth attachment of `depth_format`.
    fn create_framebuffer(&mut self, width: u16, height: u16, depth_format: PixelFormat) -> Result<FramebufferHandle, DriverError>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    fn bound_framebuffer(&self) -> Option<FramebufferHandle>;

    /// Attaches a colour target to the bound framebuffer. `side` selects the
    /// face of a cube map.
    fn attach_color(&mut self, texture: TextureHandle, side: Option<CubeMapSide>) -> Result<(), DriverError>;

    fn viewport(&self) -> Viewport;

    fn set_viewport(&mut self, viewport: Viewport);

    fn surface_size(&self) -> (u32, u32);

    // ─── Fixed-function state ─────────────────────────────────────────────────

    fn clear(&mut self, color: Vec4, mask: ClearMask, depth: f32, stencil: u8);

    fn set_alpha_test(&mut self, function: Compare, reference: f32);

    fn set_polygon_offset(&mut self, factor: f32, units: f32);

    fn set_rasterization(&mut self, mode: PolygonMode);

    /// `BlendFactor::Disabled` as the source factor disables blending.
    fn set_blending(&mut self, source: BlendFactor, destination: BlendFactor);

    fn set_color_mask(&mut self, mask: ColorMask);

    fn set_depth_state(&mut self, function: Compare, write: bool);

    fn set_cull_face(&mut self, face: TriangleFace);

    fn set_stencil_op(&mut self, stencil_fail: StencilAction, depth_fail: StencilAction, pass: StencilAction);

    fn set_stencil_func(&mut self, function: Compare, reference: u8, mask: u8);

    fn set_stencil_mask(&mut self, mask: u8);

    // ─── Draws ────────────────────────────────────────────────────────────────

    /// Draws `count` 16-bit indices starting at index `first`.
    fn draw_indexed(&mut self, primitives: PrimitiveType, first: u32, count: u32);

    fn draw_arrays(&mut self, primitives: PrimitiveType, first: u32, count: u32);

    fn present(&mut self, wait: bool);
}
