pub mod errors;
pub mod renderer;

pub use errors::{RenderError, Result};
pub use renderer::resource_ids::{
    ConstantBufferId, FeatureLayoutId, IndexBufferId, InputLayoutId, ProgramId, TextureId,
    TransientTextureId, UniformLayoutId, VertexBufferId,
};
pub use renderer::{
    CommandBufferId, Driver, HeadlessDriver, PipelineFeature, PipelineFeatureLayout,
    PipelineFeatures, RenderCounters, RenderFrame, RenderSettings, RenderingContext, State,
    StateBlock, StateStack,
};
