//! Block Merging
//!
//! Flattens an ordered list of blocks (newest first) into a single
//! [`CompiledStateBlock`]. For each state category the newest block wins;
//! older blocks only fill in categories nobody above them has set.
//!
//! ```text
//!   newest ─▶ [ Blending=Add | CullFace=None ]
//!             [ Blending=Alpha | BindVertexBuffer=7 ]        (Blending skipped)
//!   oldest ─▶ [ BindVertexBuffer=3 | DepthState=Less ]       (vb skipped)
//!
//!   result:  Blending=Add, CullFace=None, BindVertexBuffer=7, DepthState=Less
//! ```
//!
//! A block whose mask equals the mask accumulated so far cannot contribute a
//! state and is skipped without looking at its states. Its features still
//! take part in the feature composition.

use smallvec::SmallVec;

use crate::errors::{RenderError, Result};
use crate::renderer::pipeline::feature_layout::{PipelineFeature, PipelineFeatures};
use crate::renderer::settings::DEFAULT_STATE_BLOCK_CAPACITY;

use super::{State, StateBlock, StateMask};

/// The flattened state of a draw call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledStateBlock {
    /// Merged states, newest block first, no two sharing a bit.
    pub states: SmallVec<[State; DEFAULT_STATE_BLOCK_CAPACITY]>,
    /// Union of the bits of `states`.
    pub mask: StateMask,
    /// Composed user-defined and resource features.
    pub features: PipelineFeatures,
}

impl CompiledStateBlock {
    /// Bytes charged against the frame arena for this block.
    #[must_use]
    pub fn footprint(&self) -> usize {
        size_of::<Self>() + self.states.len() * size_of::<State>()
    }

    #[must_use]
    pub fn contains(&self, state_bit: u32) -> bool {
        self.mask & (1 << state_bit) != 0
    }
}

/// Merges `blocks` (newest first) into at most `max_states` states.
///
/// The feature value is
/// `user((OR user_defined) & (AND user_defined_mask)) | (OR resource_features)`.
pub fn merge_blocks<'a, I>(blocks: I, max_states: usize) -> Result<CompiledStateBlock>
where
    I: IntoIterator<Item = &'a StateBlock>,
{
    let mut compiled = CompiledStateBlock::default();
    let mut user_features: PipelineFeatures = 0;
    let mut user_features_mask = PipelineFeatures::MAX;
    let mut resource_features: PipelineFeatures = 0;

    for block in blocks {
        user_features |= block.user_defined();
        user_features_mask &= block.user_defined_mask();
        resource_features |= block.resource_features();

        if compiled.mask ^ block.mask() == 0 {
            continue;
        }

        for state in block.states() {
            let bit = state.bitmask();
            if compiled.mask & bit != 0 {
                continue;
            }
            if compiled.states.len() >= max_states {
                return Err(RenderError::StateBlockOverflow {
                    capacity: max_states,
                });
            }
            compiled.states.push(*state);
            compiled.mask |= bit;
        }
    }

    compiled.features =
        PipelineFeature::user(user_features & user_features_mask) | resource_features;
    Ok(compiled)
}
