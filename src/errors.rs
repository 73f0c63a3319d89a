//! Error Types
//!
//! This module defines the error type shared by every layer of the backend.
//!
//! # Overview
//!
//! [`RenderError`] covers two families of failures:
//! - **Contract violations** made by the recording code: a state category set
//!   twice in one block, stack overflow/underflow, an exhausted frame arena,
//!   an invalid resource or transient handle.
//! - **Driver and compile failures**: shader stages that do not compile,
//!   programs that do not link, driver objects that cannot be created.
//!
//! Both are reported through [`Result<T>`]. Nothing is recovered locally: an
//! error raised while a frame executes aborts that frame and is returned from
//! [`RenderingContext::display`](crate::renderer::context::RenderingContext::display).
//!
//! ```rust,ignore
//! use pipewright::errors::Result;
//!
//! fn record(frame: &mut RenderFrame, vertices: VertexBufferId) -> Result<()> {
//!     frame.with_scope(|block| block.bind_vertex_buffer(vertices), |frame| {
//!         frame.root().draw_primitives(0, PrimitiveType::Triangles, 0, 3)
//!     })
//! }
//! ```

use thiserror::Error;

use crate::renderer::context::driver::DriverError;
use crate::renderer::pipeline::feature_layout::PipelineFeatures;
use crate::renderer::resource_ids::ResourceKind;
use crate::renderer::types::{PixelFormat, ShaderStage};

/// The main error type of the rendering backend.
#[derive(Error, Debug)]
pub enum RenderError {
    // ========================================================================
    // State Contract Errors
    // ========================================================================
    /// A state block already contains a state of the same category.
    #[error("State '{state}' is already set in this state block")]
    StateAlreadySet {
        /// Name of the state category
        state: &'static str,
    },

    /// A state block (or a merged state list) ran out of slots.
    #[error("State block overflow: capacity is {capacity} states")]
    StateBlockOverflow {
        /// Maximum number of states
        capacity: usize,
    },

    /// Too many state blocks pushed onto the state stack.
    #[error("State stack overflow: maximum depth is {depth}")]
    StateStackOverflow {
        /// Maximum stack depth
        depth: usize,
    },

    /// A pop was requested on an empty state stack.
    #[error("State stack underflow")]
    StateStackUnderflow,

    /// Scopes were popped in a different order than they were pushed.
    #[error("State scopes must be popped in LIFO order: expected depth {expected}, got {actual}")]
    ScopeOrderViolation {
        /// Depth of the current top-of-stack entry
        expected: usize,
        /// Depth named by the scope being popped
        actual: usize,
    },

    /// A sampler or constant buffer slot index is out of range.
    #[error("{context} index {index} is out of range (maximum {max})")]
    IndexOutOfRange {
        /// What was being indexed
        context: &'static str,
        /// The invalid index
        index: usize,
        /// Exclusive upper bound
        max: usize,
    },

    // ========================================================================
    // Frame & Recording Errors
    // ========================================================================
    /// The fixed-capacity frame arena cannot satisfy an allocation.
    #[error("Frame arena exhausted: requested {requested} bytes, {allocated} of {capacity} in use")]
    FrameArenaExhausted {
        /// Bytes requested
        requested: usize,
        /// Arena capacity
        capacity: usize,
        /// Bytes already allocated
        allocated: usize,
    },

    /// A recorded span lies outside the storage it was recorded into.
    #[error("Span {offset}..{end} is outside the {allocated} recorded bytes")]
    InvalidSpan {
        /// First byte of the span
        offset: usize,
        /// End of the span (exclusive)
        end: usize,
        /// Bytes held by the storage
        allocated: usize,
    },

    /// More than 254 transient resources were requested by one command buffer.
    #[error("Too many transient resources requested by a single command buffer")]
    TooManyTransientResources,

    /// A command buffer handle does not belong to the frame.
    #[error("Invalid command buffer: {0}")]
    InvalidCommandBuffer(u32),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A resource identifier pool has no ids left.
    #[error("No free {kind} identifiers left")]
    IdentifierPoolExhausted {
        /// Resource category
        kind: ResourceKind,
    },

    /// A resource id that was never created (or was already deleted) was used.
    #[error("Invalid {kind} identifier: {id}")]
    InvalidResource {
        /// Resource category
        kind: ResourceKind,
        /// The offending id
        id: u16,
    },

    /// A transient slot index is zero or outside the current stack frame.
    #[error("Invalid transient resource slot: {0}")]
    InvalidTransientSlot(u8),

    /// The transient resource stack is full.
    #[error("Transient resource stack overflow")]
    TransientStackOverflow,

    /// The transient resource stack is empty.
    #[error("Transient resource stack underflow")]
    TransientStackUnderflow,

    /// Uploaded data does not fit the constant buffer it targets.
    #[error("Constant buffer {id} is too small: capacity {capacity} bytes, upload {size} bytes")]
    ConstantBufferTooSmall {
        /// Constant buffer id
        id: u16,
        /// Buffer size in bytes
        capacity: usize,
        /// Upload size in bytes
        size: usize,
    },

    /// A pixel format cannot be used for the requested purpose.
    #[error("Pixel format {format:?} is not supported as {usage}")]
    UnsupportedFormat {
        /// The rejected format
        format: PixelFormat,
        /// What the format was requested for
        usage: &'static str,
    },

    /// A constant buffer layout has no element with the uniform's name.
    #[error("Uniform '{name}' is not declared by the bound constant buffer layout")]
    UnknownUniform {
        /// Uniform name reported by the program
        name: String,
    },

    // ========================================================================
    // Shader Errors
    // ========================================================================
    /// A shader stage failed to compile.
    #[error("Failed to compile {stage} shader:\n{diagnostics}")]
    ShaderCompilation {
        /// Shader stage
        stage: ShaderStage,
        /// Compiler output
        diagnostics: String,
    },

    /// A program failed to link.
    #[error("Failed to link program:\n{diagnostics}")]
    ProgramLink {
        /// Linker output
        diagnostics: String,
    },

    /// A draw was issued but no permutation could be produced for it.
    #[error("No valid permutation for program {program} with features {features:#x}")]
    NoValidPermutation {
        /// Program id
        program: u16,
        /// Requested feature mask
        features: PipelineFeatures,
    },

    /// No program is bound and no default program was configured.
    #[error("No valid program set and no default program specified")]
    NoProgram,

    /// Shader include expansion failed.
    #[error("Shader template error: {0}")]
    Template(#[from] minijinja::Error),

    // ========================================================================
    // Driver Errors
    // ========================================================================
    /// The graphics driver rejected an operation.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Alias for `Result<T, RenderError>`.
pub type Result<T> = std::result::Result<T, RenderError>;
