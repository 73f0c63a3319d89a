//! Pipeline State
//!
//! The resolved binding set of the rendering context: one slot per state bit
//! holding the last value applied to the driver. Merged draw states are run
//! through [`PipelineState::apply`]; only values that actually differ mark
//! their bit dirty, and the context reissues just the dirty bits.
//!
//! The state also composes the feature mask that selects a shader
//! permutation:
//!
//! ```text
//! begin_state_block()
//!   activate_vertex_attributes / activate_sampler / activate_constant_buffer
//!   activate_features (compiled block)
//! end_state_block(layout mask)  →  features & mask, FEATURES flag on change
//! ```

use bitflags::bitflags;

use crate::errors::{RenderError, Result};
use crate::renderer::resource_ids::{
    ConstantBufferId, FeatureLayoutId, IndexBufferId, InputLayoutId, ProgramId, TextureId,
    VertexBufferId,
};
use crate::renderer::state::{
    CONSTANT_BUFFER_BIT_OFFSET, MAX_CONSTANT_BUFFERS, MAX_TEXTURE_SAMPLERS, State, StateMask,
    TEXTURE_BIT_OFFSET,
};
use crate::renderer::types::{ColorMask, Compare, PolygonMode, StencilAction, TriangleFace};

use super::feature_layout::{PipelineFeature, PipelineFeatures};

/// Number of distinct state bits.
pub const STATE_BIT_COUNT: usize = TEXTURE_BIT_OFFSET as usize + MAX_TEXTURE_SAMPLERS;

const VERTEX_BUFFER_BIT: usize = 0;
const INDEX_BUFFER_BIT: usize = 1;
const INPUT_LAYOUT_BIT: usize = 2;
const FEATURE_LAYOUT_BIT: usize = 3;
const PROGRAM_BIT: usize = 4;

bitflags! {
    /// Pipeline properties that changed since the last accepted permutation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ChangeFlags: u8 {
        const PROGRAM        = 1 << 0;
        const FEATURE_LAYOUT = 1 << 1;
        const FEATURES       = 1 << 2;
    }
}

/// Fixed-function values restored at the end of every displayed frame.
const DEFAULT_STATES: [State; 10] = [
    State::Blending(0),
    State::PolygonOffset { factor: 0, units: 0 },
    State::DepthState {
        function: Compare::LessEqual,
        write: true,
    },
    State::AlphaTest {
        function: Compare::Disabled,
        reference: 0,
    },
    State::CullFace(TriangleFace::Back),
    State::Rasterization(PolygonMode::Fill),
    State::StencilOp {
        stencil_fail: StencilAction::Keep,
        depth_fail: StencilAction::Keep,
        pass: StencilAction::Keep,
    },
    State::StencilFunc {
        function: Compare::Disabled,
        reference: 0,
        mask: 0xFF,
    },
    State::StencilMask(0xFF),
    State::ColorMask(ColorMask::ALL),
];

#[derive(Debug, Clone)]
pub struct PipelineState {
    states: [Option<State>; STATE_BIT_COUNT],
    dirty: StateMask,
    block_features: PipelineFeatures,
    features: PipelineFeatures,
    changes: ChangeFlags,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    #[must_use]
    pub fn new() -> Self {
        let mut state = Self {
            states: [None; STATE_BIT_COUNT],
            dirty: 0,
            block_features: 0,
            features: 0,
            changes: ChangeFlags::all(),
        };
        state.reset();
        state
    }

    /// Restores the default bindings and raster values.
    ///
    /// Every bit is marked dirty so the next flush reissues the whole state.
    pub fn reset(&mut self) {
        self.states = [None; STATE_BIT_COUNT];
        for state in DEFAULT_STATES {
            self.states[state.bit() as usize] = Some(state);
        }
        self.dirty = StateMask::MAX >> (StateMask::BITS as usize - STATE_BIT_COUNT);
        self.block_features = 0;
        self.features = 0;
        self.changes = ChangeFlags::all();
    }

    // ─── State slots ──────────────────────────────────────────────────────────

    /// Records `state` if it differs from the current value of its bit.
    ///
    /// Returns `true` when the value changed.
    pub fn apply(&mut self, state: State) -> bool {
        let bit = state.bit() as usize;
        if self.states[bit] == Some(state) {
            return false;
        }

        match state {
            State::BindProgram(_) => self.changes |= ChangeFlags::PROGRAM,
            State::SetFeatureLayout(_) => self.changes |= ChangeFlags::FEATURE_LAYOUT,
            _ => {}
        }

        self.states[bit] = Some(state);
        self.dirty |= state.bitmask();
        true
    }

    /// Returns the bits changed since the last call and clears them.
    pub fn take_dirty(&mut self) -> StateMask {
        std::mem::take(&mut self.dirty)
    }

    #[must_use]
    pub fn dirty(&self) -> StateMask {
        self.dirty
    }

    /// Current value of a state bit.
    #[must_use]
    pub fn state(&self, bit: u32) -> Option<State> {
        self.states.get(bit as usize).copied().flatten()
    }

    #[must_use]
    pub fn vertex_buffer(&self) -> VertexBufferId {
        match self.states[VERTEX_BUFFER_BIT] {
            Some(State::BindVertexBuffer(id)) => id,
            _ => VertexBufferId::INVALID,
        }
    }

    #[must_use]
    pub fn index_buffer(&self) -> IndexBufferId {
        match self.states[INDEX_BUFFER_BIT] {
            Some(State::BindIndexBuffer(id)) => id,
            _ => IndexBufferId::INVALID,
        }
    }

    #[must_use]
    pub fn input_layout(&self) -> InputLayoutId {
        match self.states[INPUT_LAYOUT_BIT] {
            Some(State::SetInputLayout(id)) => id,
            _ => InputLayoutId::INVALID,
        }
    }

    #[must_use]
    pub fn feature_layout(&self) -> FeatureLayoutId {
        match self.states[FEATURE_LAYOUT_BIT] {
            Some(State::SetFeatureLayout(id)) => id,
            _ => FeatureLayoutId::INVALID,
        }
    }

    #[must_use]
    pub fn program(&self) -> ProgramId {
        match self.states[PROGRAM_BIT] {
            Some(State::BindProgram(id)) => id,
            _ => ProgramId::INVALID,
        }
    }

    /// Persistent texture bound to `sampler`. Transient bindings are expected
    /// to be resolved to persistent ids before they are applied.
    #[must_use]
    pub fn texture(&self, sampler: u8) -> TextureId {
        match self.state(TEXTURE_BIT_OFFSET + u32::from(sampler)) {
            Some(State::BindTexture { id, .. }) => id,
            _ => TextureId::INVALID,
        }
    }

    #[must_use]
    pub fn constant_buffer(&self, slot: u8) -> ConstantBufferId {
        match self.state(CONSTANT_BUFFER_BIT_OFFSET + u32::from(slot)) {
            Some(State::BindConstantBuffer { id, .. }) => id,
            _ => ConstantBufferId::INVALID,
        }
    }

    /// Forgets a deleted program so that a recycled id is bound again.
    pub fn reset_program(&mut self, id: ProgramId) {
        if self.program() == id {
            self.states[PROGRAM_BIT] = None;
            self.changes |= ChangeFlags::PROGRAM;
        }
    }

    /// Forgets a deleted texture in every sampler it was bound to.
    pub fn reset_texture(&mut self, id: TextureId) {
        for sampler in 0..MAX_TEXTURE_SAMPLERS as u8 {
            if self.texture(sampler) == id {
                self.states[(TEXTURE_BIT_OFFSET + u32::from(sampler)) as usize] = None;
            }
        }
    }

    /// Forgets a deleted constant buffer in every slot it was bound to.
    pub fn reset_constant_buffer(&mut self, id: ConstantBufferId) {
        for slot in 0..MAX_CONSTANT_BUFFERS as u8 {
            if self.constant_buffer(slot) == id {
                self.states[(CONSTANT_BUFFER_BIT_OFFSET + u32::from(slot)) as usize] = None;
            }
        }
    }

    // ─── Features ─────────────────────────────────────────────────────────────

    /// Starts collecting the features of the next draw.
    pub fn begin_state_block(&mut self) {
        self.block_features = 0;
    }

    pub fn activate_vertex_attributes(&mut self, features: PipelineFeatures) {
        self.block_features |= features;
    }

    pub fn activate_sampler(&mut self, index: u8) -> Result<()> {
        if usize::from(index) >= MAX_TEXTURE_SAMPLERS {
            return Err(RenderError::IndexOutOfRange {
                context: "Texture sampler",
                index: usize::from(index),
                max: MAX_TEXTURE_SAMPLERS,
            });
        }
        self.block_features |= PipelineFeature::sampler(index);
        Ok(())
    }

    pub fn activate_constant_buffer(&mut self, index: u8) -> Result<()> {
        if usize::from(index) >= MAX_CONSTANT_BUFFERS {
            return Err(RenderError::IndexOutOfRange {
                context: "Constant buffer slot",
                index: usize::from(index),
                max: MAX_CONSTANT_BUFFERS,
            });
        }
        self.block_features |= PipelineFeature::constant_buffer(index);
        Ok(())
    }

    /// Activates features already expressed in pipeline-feature space.
    pub fn activate_features(&mut self, features: PipelineFeatures) {
        self.block_features |= features;
    }

    /// Masks the collected features with the feature layout and records a
    /// change when the result differs from the previous draw.
    pub fn end_state_block(&mut self, layout_mask: PipelineFeatures) {
        let features = self.block_features & layout_mask;
        if features != self.features {
            self.features = features;
            self.changes |= ChangeFlags::FEATURES;
        }
    }

    /// Features of the current permutation, already masked by the layout.
    #[must_use]
    pub fn features(&self) -> PipelineFeatures {
        self.features
    }

    #[must_use]
    pub fn changes(&self) -> ChangeFlags {
        self.changes
    }

    pub fn accept_changes(&mut self) {
        self.changes = ChangeFlags::empty();
    }
}
