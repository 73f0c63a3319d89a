//! Rendering Backend
//!
//! Provides:
//! - frame: per-frame arena, command buffers and compiled state blocks
//! - state: render states, state blocks, the state stack and merging
//! - commands: opcodes and their recorders
//! - pipeline: feature layouts, the resolved pipeline state and shader
//!   permutation generation
//! - context: the rendering context and the driver interface
//!
//! ```text
//!  producer ──record──▶ RenderFrame ──display──▶ RenderingContext ──▶ Driver
//!     │                                              ▲
//!     └──────────── request_* (ids right away) ──────┘
//! ```

pub mod commands;
pub mod context;
pub mod frame;
pub mod pipeline;
pub mod resource_ids;
pub mod settings;
pub mod state;
pub mod types;
pub mod uniform_layout;
pub mod vertex_format;

pub use commands::{CommandBuffer, CommandRecorder, OpCode};
pub use context::{Driver, HeadlessDriver, RenderCounters, RenderingContext};
pub use frame::{CommandBufferId, RenderFrame};
pub use pipeline::{PipelineFeature, PipelineFeatureLayout, PipelineFeatures, ShaderLibrary};
pub use settings::RenderSettings;
pub use state::{State, StateBlock, StateStack};
