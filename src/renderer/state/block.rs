//! State Blocks
//!
//! A [`StateBlock`] is one layer of configuration ("material defaults",
//! "shadow pass overrides", ...). It holds at most one state per category
//! and up to `capacity` states in total, in insertion order.
//!
//! Besides states a block carries two feature side channels:
//!
//! - **User features**: `enable_features` / `disable_features` toggle
//!   ubershader switches. Masks are given in user space and shifted into the
//!   user-defined group only when blocks are merged.
//! - **Resource features**: every constant buffer and texture binding also
//!   enables the matching sampler / cbuffer feature bit.

use smallvec::SmallVec;

use crate::errors::{RenderError, Result};
use crate::renderer::pipeline::feature_layout::{PipelineFeature, PipelineFeatures};
use crate::renderer::resource_ids::{
    ConstantBufferId, FeatureLayoutId, IndexBufferId, InputLayoutId, ProgramId, TextureId,
    TransientTextureId, VertexBufferId,
};
use crate::renderer::settings::DEFAULT_STATE_BLOCK_CAPACITY;
use crate::renderer::types::{
    BlendFactor, ColorMask, Compare, PolygonMode, StencilAction, TriangleFace,
};

use super::{MAX_CONSTANT_BUFFERS, MAX_TEXTURE_SAMPLERS, State, StateMask};

/// Ordered, fixed-capacity collection of states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateBlock {
    states: SmallVec<[State; DEFAULT_STATE_BLOCK_CAPACITY]>,
    capacity: usize,
    mask: StateMask,
    user_defined: PipelineFeatures,
    user_defined_mask: PipelineFeatures,
    resource_features: PipelineFeatures,
}

impl Default for StateBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBlock {
    /// Creates an empty block holding up to eight states.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STATE_BLOCK_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            states: SmallVec::new(),
            capacity,
            mask: 0,
            user_defined: 0,
            user_defined_mask: PipelineFeatures::MAX,
            resource_features: 0,
        }
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    /// Bitmask of the state categories present in this block.
    #[inline]
    #[must_use]
    pub fn mask(&self) -> StateMask {
        self.mask
    }

    #[inline]
    #[must_use]
    pub fn states(&self) -> &[State] {
        &self.states
    }

    #[inline]
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self, index: usize) -> Result<&State> {
        self.states.get(index).ok_or(RenderError::IndexOutOfRange {
            context: "state",
            index,
            max: self.states.len(),
        })
    }

    /// User features enabled by this block (user space).
    #[inline]
    #[must_use]
    pub fn user_defined(&self) -> PipelineFeatures {
        self.user_defined
    }

    /// User features this block allows to stay enabled (user space).
    #[inline]
    #[must_use]
    pub fn user_defined_mask(&self) -> PipelineFeatures {
        self.user_defined_mask
    }

    /// Sampler and constant buffer feature bits of this block's bindings.
    #[inline]
    #[must_use]
    pub fn resource_features(&self) -> PipelineFeatures {
        self.resource_features
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    // ─── Features ─────────────────────────────────────────────────────────────

    pub fn enable_features(&mut self, features: PipelineFeatures) {
        self.user_defined |= features;
    }

    /// Masks out `features` for this block and every block merged with it.
    pub fn disable_features(&mut self, features: PipelineFeatures) {
        self.user_defined_mask &= !features;
    }

    // ─── Bindings ─────────────────────────────────────────────────────────────

    pub fn bind_vertex_buffer(&mut self, id: VertexBufferId) -> Result<()> {
        self.push(State::BindVertexBuffer(id))
    }

    pub fn bind_index_buffer(&mut self, id: IndexBufferId) -> Result<()> {
        self.push(State::BindIndexBuffer(id))
    }

    pub fn bind_input_layout(&mut self, id: InputLayoutId) -> Result<()> {
        self.push(State::SetInputLayout(id))
    }

    pub fn bind_feature_layout(&mut self, id: FeatureLayoutId) -> Result<()> {
        self.push(State::SetFeatureLayout(id))
    }

    pub fn bind_program(&mut self, id: ProgramId) -> Result<()> {
        self.push(State::BindProgram(id))
    }

    pub fn bind_constant_buffer(&mut self, id: ConstantBufferId, slot: u8) -> Result<()> {
        check_index("constant buffer slot", slot, MAX_CONSTANT_BUFFERS)?;
        self.push(State::BindConstantBuffer { id, slot })?;
        self.resource_features |= PipelineFeature::constant_buffer(slot);
        Ok(())
    }

    pub fn bind_texture(&mut self, id: TextureId, sampler: u8) -> Result<()> {
        check_index("texture sampler", sampler, MAX_TEXTURE_SAMPLERS)?;
        self.push(State::BindTexture { id, sampler })?;
        self.resource_features |= PipelineFeature::sampler(sampler);
        Ok(())
    }

    /// Binds a transient texture acquired by the command buffer being recorded.
    pub fn bind_transient_texture(&mut self, id: TransientTextureId, sampler: u8) -> Result<()> {
        check_index("texture sampler", sampler, MAX_TEXTURE_SAMPLERS)?;
        self.push(State::BindTransientTexture { id, sampler })?;
        self.resource_features |= PipelineFeature::sampler(sampler);
        Ok(())
    }

    // ─── Fixed function ───────────────────────────────────────────────────────

    pub fn set_blend(&mut self, src: BlendFactor, dst: BlendFactor) -> Result<()> {
        self.push(State::blending(src, dst))
    }

    pub fn disable_blending(&mut self) -> Result<()> {
        self.set_blend(BlendFactor::Disabled, BlendFactor::Disabled)
    }

    pub fn set_depth_state(&mut self, function: Compare, write: bool) -> Result<()> {
        self.push(State::DepthState { function, write })
    }

    pub fn set_polygon_offset(&mut self, factor: f32, units: f32) -> Result<()> {
        self.push(State::polygon_offset(factor, units))
    }

    pub fn disable_polygon_offset(&mut self) -> Result<()> {
        self.set_polygon_offset(0.0, 0.0)
    }

    pub fn set_polygon_mode(&mut self, mode: PolygonMode) -> Result<()> {
        self.push(State::Rasterization(mode))
    }

    pub fn set_color_mask(&mut self, mask: ColorMask) -> Result<()> {
        self.push(State::ColorMask(mask))
    }

    pub fn set_stencil_op(
        &mut self,
        stencil_fail: StencilAction,
        depth_fail: StencilAction,
        pass: StencilAction,
    ) -> Result<()> {
        self.push(State::StencilOp {
            stencil_fail,
            depth_fail,
            pass,
        })
    }

    pub fn set_stencil_mask(&mut self, mask: u8) -> Result<()> {
        self.push(State::StencilMask(mask))
    }

    pub fn set_stencil_function(&mut self, function: Compare, reference: u8, mask: u8) -> Result<()> {
        self.push(State::StencilFunc {
            function,
            reference,
            mask,
        })
    }

    pub fn disable_stencil_test(&mut self) -> Result<()> {
        self.set_stencil_function(Compare::Disabled, 0, 0xFF)
    }

    pub fn set_alpha_test(&mut self, function: Compare, reference: f32) -> Result<()> {
        self.push(State::alpha_test(function, reference))
    }

    pub fn disable_alpha_test(&mut self) -> Result<()> {
        self.set_alpha_test(Compare::Disabled, 0.0)
    }

    pub fn set_cull_face(&mut self, face: TriangleFace) -> Result<()> {
        self.push(State::CullFace(face))
    }

    /// Appends a state. A category may be set once per block.
    pub fn push(&mut self, state: State) -> Result<()> {
        let bit = state.bitmask();
        if self.mask & bit != 0 {
            return Err(RenderError::StateAlreadySet { state: state.name() });
        }
        if self.states.len() >= self.capacity {
            return Err(RenderError::StateBlockOverflow {
                capacity: self.capacity,
            });
        }

        self.states.push(state);
        self.mask |= bit;
        Ok(())
    }

    /// Removes every state and feature, keeping the capacity.
    pub fn clear(&mut self) {
        *self = Self::with_capacity(self.capacity);
    }
}

fn check_index(context: &'static str, index: u8, max: usize) -> Result<()> {
    if usize::from(index) >= max {
        return Err(RenderError::IndexOutOfRange {
            context,
            index: usize::from(index),
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_category_is_rejected() {
        let mut block = StateBlock::new();
        block.bind_vertex_buffer(VertexBufferId::new(1)).unwrap();
        let err = block.bind_vertex_buffer(VertexBufferId::new(2)).unwrap_err();
        assert!(matches!(err, RenderError::StateAlreadySet { state: "BindVertexBuffer" }));
        assert_eq!(block.state_count(), 1);
    }

    #[test]
    fn test_transient_and_persistent_texture_share_sampler() {
        let mut block = StateBlock::new();
        block.bind_texture(TextureId::new(4), 2).unwrap();
        assert!(block.bind_transient_texture(TransientTextureId::new(1), 2).is_err());
        block.bind_transient_texture(TransientTextureId::new(1), 3).unwrap();
    }

    #[test]
    fn test_capacity_overflow() {
        let mut block = StateBlock::with_capacity(2);
        block.set_cull_face(TriangleFace::Front).unwrap();
        block.set_stencil_mask(0xF0).unwrap();
        assert!(matches!(
            block.set_color_mask(ColorMask::RGB),
            Err(RenderError::StateBlockOverflow { capacity: 2 })
        ));
    }

    #[test]
    fn test_slot_out_of_range() {
        let mut block = StateBlock::new();
        assert!(matches!(
            block.bind_constant_buffer(ConstantBufferId::new(1), 8),
            Err(RenderError::IndexOutOfRange { index: 8, max: 8, .. })
        ));
        assert!(block.is_empty());
    }

    #[test]
    fn test_resource_features_follow_bindings() {
        let mut block = StateBlock::new();
        block.bind_constant_buffer(ConstantBufferId::new(1), 1).unwrap();
        block.bind_texture(TextureId::new(1), 0).unwrap();
        assert_eq!(
            block.resource_features(),
            PipelineFeature::constant_buffer(1) | PipelineFeature::sampler(0)
        );
    }

    #[test]
    fn test_features_do_not_consume_capacity() {
        let mut block = StateBlock::with_capacity(1);
        block.enable_features(0b101);
        block.disable_features(0b100);
        block.set_cull_face(TriangleFace::Back).unwrap();
        assert_eq!(block.user_defined(), 0b101);
        assert_eq!(block.user_defined_mask(), !0b100);
    }
}
