//! Render States
//!
//! A [`State`] is one atomic pipeline change. Every state maps to a stable
//! bit index so that blocks can be merged with plain mask arithmetic:
//!
//! ```text
//!  bit   0..=14   one bit per scalar category (buffers, layout, raster state)
//!  bit  15..=22   BindConstantBuffer, one bit per slot
//!  bit  23..=30   BindTexture / BindTransientTexture, one bit per sampler
//! ```
//!
//! Two states with the same bit are the same category: a newer block
//! overrides an older one, and a single block may hold only one of them.

use crate::renderer::resource_ids::{
    ConstantBufferId, FeatureLayoutId, IndexBufferId, InputLayoutId, ProgramId, TextureId,
    TransientTextureId, VertexBufferId,
};
use crate::renderer::types::{
    BlendFactor, ColorMask, Compare, PolygonMode, StencilAction, TriangleFace,
};

use super::{MAX_CONSTANT_BUFFERS, StateMask};

/// Scale applied to polygon offset values before they are packed into bytes.
pub const POLYGON_OFFSET_SCALE: f32 = 128.0;

/// First constant buffer bit.
pub const CONSTANT_BUFFER_BIT_OFFSET: u32 = 15;

/// First texture sampler bit.
pub const TEXTURE_BIT_OFFSET: u32 = CONSTANT_BUFFER_BIT_OFFSET + MAX_CONSTANT_BUFFERS as u32;

/// One atomic render state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    BindVertexBuffer(VertexBufferId),
    BindIndexBuffer(IndexBufferId),
    SetInputLayout(InputLayoutId),
    SetFeatureLayout(FeatureLayoutId),
    BindProgram(ProgramId),
    /// Source factor in the high nibble, destination in the low nibble.
    Blending(u8),
    /// Factor and units multiplied by [`POLYGON_OFFSET_SCALE`].
    PolygonOffset { factor: i8, units: i8 },
    DepthState { function: Compare, write: bool },
    /// Reference value scaled to `0..=255`.
    AlphaTest { function: Compare, reference: u8 },
    CullFace(TriangleFace),
    Rasterization(PolygonMode),
    StencilOp {
        stencil_fail: StencilAction,
        depth_fail: StencilAction,
        pass: StencilAction,
    },
    StencilFunc { function: Compare, reference: u8, mask: u8 },
    StencilMask(u8),
    ColorMask(ColorMask),
    BindConstantBuffer { id: ConstantBufferId, slot: u8 },
    BindTexture { id: TextureId, sampler: u8 },
    BindTransientTexture { id: TransientTextureId, sampler: u8 },
}

impl State {
    /// Packs a blend function into a `Blending` state.
    #[must_use]
    pub fn blending(src: BlendFactor, dst: BlendFactor) -> Self {
        Self::Blending(((src as u8) << 4) | (dst as u8 & 0xF))
    }

    /// Packs a polygon offset, saturating values outside `-1.0..1.0`.
    #[must_use]
    pub fn polygon_offset(factor: f32, units: f32) -> Self {
        let pack = |v: f32| (v * POLYGON_OFFSET_SCALE).clamp(-128.0, 127.0) as i8;
        Self::PolygonOffset {
            factor: pack(factor),
            units: pack(units),
        }
    }

    /// Packs an alpha test with a reference in `0.0..=1.0`.
    #[must_use]
    pub fn alpha_test(function: Compare, reference: f32) -> Self {
        Self::AlphaTest {
            function,
            reference: (reference.clamp(0.0, 1.0) * 255.0) as u8,
        }
    }

    /// Bit index of this state's category.
    #[must_use]
    pub fn bit(&self) -> u32 {
        match *self {
            Self::BindVertexBuffer(_) => 0,
            Self::BindIndexBuffer(_) => 1,
            Self::SetInputLayout(_) => 2,
            Self::SetFeatureLayout(_) => 3,
            Self::BindProgram(_) => 4,
            Self::Blending(_) => 5,
            Self::PolygonOffset { .. } => 6,
            Self::DepthState { .. } => 7,
            Self::AlphaTest { .. } => 8,
            Self::CullFace(_) => 9,
            Self::Rasterization(_) => 10,
            Self::StencilOp { .. } => 11,
            Self::StencilFunc { .. } => 12,
            Self::StencilMask(_) => 13,
            Self::ColorMask(_) => 14,
            Self::BindConstantBuffer { slot, .. } => CONSTANT_BUFFER_BIT_OFFSET + u32::from(slot),
            Self::BindTexture { sampler, .. } | Self::BindTransientTexture { sampler, .. } => {
                TEXTURE_BIT_OFFSET + u32::from(sampler)
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn bitmask(&self) -> StateMask {
        1 << self.bit()
    }

    /// Category name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::BindVertexBuffer(_) => "BindVertexBuffer",
            Self::BindIndexBuffer(_) => "BindIndexBuffer",
            Self::SetInputLayout(_) => "SetInputLayout",
            Self::SetFeatureLayout(_) => "SetFeatureLayout",
            Self::BindProgram(_) => "BindProgram",
            Self::Blending(_) => "Blending",
            Self::PolygonOffset { .. } => "PolygonOffset",
            Self::DepthState { .. } => "DepthState",
            Self::AlphaTest { .. } => "AlphaTest",
            Self::CullFace(_) => "CullFace",
            Self::Rasterization(_) => "Rasterization",
            Self::StencilOp { .. } => "StencilOp",
            Self::StencilFunc { .. } => "StencilFunc",
            Self::StencilMask(_) => "StencilMask",
            Self::ColorMask(_) => "ColorMask",
            Self::BindConstantBuffer { .. } => "BindConstantBuffer",
            Self::BindTexture { .. } => "BindTexture",
            Self::BindTransientTexture { .. } => "BindTransientTexture",
        }
    }

    /// Source blend factor of a `Blending` state, `Disabled` otherwise.
    #[must_use]
    pub fn source_blend_factor(&self) -> BlendFactor {
        match *self {
            Self::Blending(packed) => BlendFactor::from_bits(packed >> 4),
            _ => BlendFactor::Disabled,
        }
    }

    #[must_use]
    pub fn dest_blend_factor(&self) -> BlendFactor {
        match *self {
            Self::Blending(packed) => BlendFactor::from_bits(packed & 0xF),
            _ => BlendFactor::Disabled,
        }
    }

    #[must_use]
    pub fn alpha_reference(&self) -> f32 {
        match *self {
            Self::AlphaTest { reference, .. } => f32::from(reference) / 255.0,
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn polygon_offset_factor(&self) -> f32 {
        match *self {
            Self::PolygonOffset { factor, .. } => f32::from(factor) / POLYGON_OFFSET_SCALE,
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn polygon_offset_units(&self) -> f32 {
        match *self {
            Self::PolygonOffset { units, .. } => f32::from(units) / POLYGON_OFFSET_SCALE,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_packing() {
        let state = State::blending(BlendFactor::SrcAlpha, BlendFactor::InvSrcAlpha);
        assert_eq!(state.source_blend_factor(), BlendFactor::SrcAlpha);
        assert_eq!(state.dest_blend_factor(), BlendFactor::InvSrcAlpha);
    }

    #[test]
    fn test_polygon_offset_scaling() {
        let state = State::polygon_offset(0.5, -0.25);
        assert_eq!(state, State::PolygonOffset { factor: 64, units: -32 });
        assert!((state.polygon_offset_factor() - 0.5).abs() < f32::EPSILON);
        assert!((state.polygon_offset_units() + 0.25).abs() < f32::EPSILON);

        // Saturates instead of wrapping.
        assert_eq!(
            State::polygon_offset(4.0, -4.0),
            State::PolygonOffset { factor: 127, units: -128 }
        );
    }

    #[test]
    fn test_alpha_reference_scaling() {
        let state = State::alpha_test(Compare::Greater, 1.0);
        assert_eq!(state, State::AlphaTest { function: Compare::Greater, reference: 255 });
        assert!((state.alpha_reference() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_slot_bits_are_distinct() {
        let cb0 = State::BindConstantBuffer { id: ConstantBufferId::new(1), slot: 0 };
        let cb7 = State::BindConstantBuffer { id: ConstantBufferId::new(1), slot: 7 };
        let tex0 = State::BindTexture { id: TextureId::new(1), sampler: 0 };
        let transient0 = State::BindTransientTexture { id: TransientTextureId::new(1), sampler: 0 };

        assert_eq!(cb0.bit(), 15);
        assert_eq!(cb7.bit(), 22);
        assert_eq!(tex0.bit(), 23);
        assert_eq!(tex0.bit(), transient0.bit());
        assert_eq!(State::ColorMask(ColorMask::ALL).bit(), 14);
    }
}
