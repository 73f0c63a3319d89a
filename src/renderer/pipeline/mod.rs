//! Pipeline Module
//!
//! Everything between a merged state list and a bound program:
//! - feature_layout: feature bit groups and the name → sub-mask mapping
//! - pipeline_state: the accumulated per-draw binding state
//! - shader_library: stage sources, includes and permutation generation

pub mod feature_layout;
pub mod pipeline_state;
pub mod shader_library;

pub use feature_layout::{FeatureElement, PipelineFeature, PipelineFeatureLayout, PipelineFeatures};
pub use pipeline_state::{ChangeFlags, PipelineState};
pub use shader_library::{
    ConstantBufferPreprocessor, ProgramDescriptor, ShaderLibrary, ShaderPrecisionPreprocessor,
    ShaderPreprocessor, ShaderSources, ShaderVersionPreprocessor,
};
