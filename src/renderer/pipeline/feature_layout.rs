//! Pipeline Features
//!
//! A [`PipelineFeatures`] mask describes every shader-relevant condition of a
//! draw. Four groups share one 64-bit word:
//!
//! ```text
//!  63                30 29        22 21        14 13          0
//! ┌────────────────────┬────────────┬────────────┬─────────────┐
//! │ user defined (34)  │ cbuffer(8) │ sampler(8) │ vertex (13) │
//! └────────────────────┴────────────┴────────────┴─────────────┘
//! ```
//!
//! A [`PipelineFeatureLayout`] names sub-masks of that word. When a shader
//! permutation is generated, every named feature whose mask intersects the
//! active features becomes a `#define NAME value` line.


use crate::errors::{RenderError, Result};
use crate::renderer::state::{MAX_CONSTANT_BUFFERS, MAX_TEXTURE_SAMPLERS};
use crate::renderer::vertex_format::{MAX_VERTEX_ATTRIBUTES, VertexAttribute};

/// Bitmask of active pipeline features.
pub type PipelineFeatures = u64;

/// Constructors for the individual feature bits.
pub struct PipelineFeature;

impl PipelineFeature {
    /// First bit of the texture sampler group.
    pub const SAMPLER_FEATURES_OFFSET: u32 = MAX_VERTEX_ATTRIBUTES as u32;
    /// First bit of the constant buffer group.
    pub const CBUFFER_FEATURES_OFFSET: u32 =
        Self::SAMPLER_FEATURES_OFFSET + MAX_TEXTURE_SAMPLERS as u32;
    /// First bit of the user-defined group.
    pub const USER_DEFINED_FEATURES_OFFSET: u32 =
        Self::CBUFFER_FEATURES_OFFSET + MAX_CONSTANT_BUFFERS as u32;
    /// Number of user-defined feature bits.
    pub const MAX_USER_DEFINED_FEATURE_BITS: u32 = 64 - Self::USER_DEFINED_FEATURES_OFFSET;

    /// Bit of a vertex attribute. Position is implied and has no bit.
    #[inline]
    #[must_use]
    pub const fn vertex_attribute(attribute: VertexAttribute) -> PipelineFeatures {
        match attribute {
            VertexAttribute::Position => 0,
            other => 1 << (other as u32 - 1),
        }
    }

    #[inline]
    #[must_use]
    pub const fn sampler(index: u8) -> PipelineFeatures {
        1 << (Self::SAMPLER_FEATURES_OFFSET + index as u32)
    }

    #[inline]
    #[must_use]
    pub const fn constant_buffer(index: u8) -> PipelineFeatures {
        1 << (Self::CBUFFER_FEATURES_OFFSET + index as u32)
    }

    /// Shifts a user-space mask into the user-defined group.
    #[inline]
    #[must_use]
    pub const fn user(mask: PipelineFeatures) -> PipelineFeatures {
        mask << Self::USER_DEFINED_FEATURES_OFFSET
    }
}

/// A named sub-mask of the feature word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureElement {
    pub name: String,
    pub mask: PipelineFeatures,
    /// Lowest set bit of `mask`.
    pub offset: u32,
}

/// Maps feature sub-masks to preprocessor macro names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineFeatureLayout {
    elements: Vec<FeatureElement>,
    mask: PipelineFeatures,
}

impl PipelineFeatureLayout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a layout from `(name, mask)` pairs.
    #[must_use]
    pub fn from_features<S: AsRef<str>>(features: &[(S, PipelineFeatures)]) -> Self {
        let mut layout = Self::new();
        for (name, mask) in features {
            layout.add_feature(name.as_ref(), *mask);
        }
        layout
    }

    pub fn add_feature(&mut self, name: impl Into<String>, mask: PipelineFeatures) {
        let offset = if mask == 0 { 0 } else { mask.trailing_zeros() };
        self.mask |= mask;
        self.elements.push(FeatureElement {
            name: name.into(),
            mask,
            offset,
        });
    }

    /// Union of every element mask. Features outside it never reach a shader.
    #[must_use]
    pub fn mask(&self) -> PipelineFeatures {
        self.mask
    }

    #[must_use]
    pub fn elements(&self) -> &[FeatureElement] {
        &self.elements
    }

    pub fn element_at(&self, index: usize) -> Result<&FeatureElement> {
        self.elements.get(index).ok_or(RenderError::IndexOutOfRange {
            context: "feature element",
            index,
            max: self.elements.len(),
        })
    }

    /// Elements whose mask intersects `features`.
    pub fn active(&self, features: PipelineFeatures) -> impl Iterator<Item = &FeatureElement> {
        self.elements.iter().filter(move |e| features & e.mask != 0)
    }

    /// `#define` header for a permutation with the given features.
    #[must_use]
    pub fn generate_defines(&self, features: PipelineFeatures) -> String {
        let mut defines = String::new();
        for element in self.active(features) {
            let value = (features & element.mask) >> element.offset;
            defines.push_str(&format!("#define {} {value}\n", element.name));
        }
        defines
    }
}
