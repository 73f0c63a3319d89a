//! Vertex Formats
//!
//! A [`VertexFormat`] is a compact attribute mask describing an interleaved
//! vertex. [`VertexBufferLayout`] expands it into per-attribute element
//! descriptions plus the pipeline feature bits those attributes enable.
//!
//! Interleaving order is fixed: position, normal, colour, uv0, uv1.
//!
//! ```text
//! POSITION | COLOR | UV0
//! ┌──────────────┬──────┬──────────┐
//! │ pos (12)     │ c(4) │ uv0 (8)  │  = 24 bytes
//! └──────────────┴──────┴──────────┘
//! ```

use bitflags::bitflags;

use crate::renderer::pipeline::feature_layout::{PipelineFeature, PipelineFeatures};

/// Vertex attribute slots, in shader attribute location order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VertexAttribute {
    Position = 0,
    Normal,
    Color,
    TexCoord0,
    TexCoord1,
    TexCoord2,
    TexCoord3,
    TexCoord4,
    TexCoord5,
    TexCoord6,
    TexCoord7,
    Tangent,
    Bitangent,
    PointSize,
}

/// Number of vertex attribute slots.
pub const MAX_VERTEX_ATTRIBUTES: usize = 14;

impl VertexAttribute {
    pub const ALL: [Self; MAX_VERTEX_ATTRIBUTES] = [
        Self::Position,
        Self::Normal,
        Self::Color,
        Self::TexCoord0,
        Self::TexCoord1,
        Self::TexCoord2,
        Self::TexCoord3,
        Self::TexCoord4,
        Self::TexCoord5,
        Self::TexCoord6,
        Self::TexCoord7,
        Self::Tangent,
        Self::Bitangent,
        Self::PointSize,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Attributes present in an interleaved vertex.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct VertexFormat: u8 {
        const POSITION = 1 << 0;
        const NORMAL   = 1 << 1;
        const COLOR    = 1 << 2;
        const UV0      = 1 << 3;
        const UV1      = 1 << 4;
    }
}

impl Default for VertexFormat {
    fn default() -> Self {
        Self::POSITION
    }
}

impl VertexFormat {
    /// Builds a format from `attributes`; position is always present.
    #[must_use]
    pub fn new(attributes: Self) -> Self {
        attributes | Self::POSITION
    }

    /// Interleaved attributes in memory order.
    const LAYOUT: [(Self, VertexAttribute, usize); 5] = [
        (Self::POSITION, VertexAttribute::Position, 12),
        (Self::NORMAL, VertexAttribute::Normal, 12),
        (Self::COLOR, VertexAttribute::Color, 4),
        (Self::UV0, VertexAttribute::TexCoord0, 8),
        (Self::UV1, VertexAttribute::TexCoord1, 8),
    ];

    /// Size of one vertex in bytes.
    #[must_use]
    pub fn vertex_size(self) -> usize {
        Self::LAYOUT
            .iter()
            .filter(|(flag, _, _)| self.contains(*flag) || *flag == Self::POSITION)
            .map(|(_, _, size)| size)
            .sum()
    }

    /// Byte size of `attribute`, or `0` if it can't be stored in this format.
    #[must_use]
    pub fn attribute_size(attribute: VertexAttribute) -> usize {
        Self::LAYOUT
            .iter()
            .find(|(_, attr, _)| *attr == attribute)
            .map_or(0, |(_, _, size)| *size)
    }

    /// Byte offset of `attribute` within a vertex, `None` if absent.
    #[must_use]
    pub fn attribute_offset(self, attribute: VertexAttribute) -> Option<usize> {
        let format = Self::new(self);
        let mut offset = 0;
        for (flag, attr, size) in Self::LAYOUT {
            if !format.contains(flag) {
                continue;
            }
            if attr == attribute {
                return Some(offset);
            }
            offset += size;
        }
        None
    }

    /// Byte offset of the vertex at `index`.
    #[must_use]
    pub fn vertex_offset(self, index: usize) -> usize {
        self.vertex_size() * index
    }
}

/// One attribute of an input layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexElement {
    /// Number of scalar components.
    pub components: u8,
    /// Byte offset within a vertex.
    pub offset: usize,
    /// Components are normalised unsigned bytes rather than floats.
    pub normalized: bool,
}

/// Input layout derived from a [`VertexFormat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBufferLayout {
    pub format: VertexFormat,
    pub vertex_size: usize,
    pub elements: [Option<VertexElement>; MAX_VERTEX_ATTRIBUTES],
    /// Feature bits contributed by the non-position attributes.
    pub features: PipelineFeatures,
}

impl VertexBufferLayout {
    #[must_use]
    pub fn from_format(format: VertexFormat) -> Self {
        let format = VertexFormat::new(format);
        let mut elements = [None; MAX_VERTEX_ATTRIBUTES];
        let mut features = 0;

        for (flag, attribute, size) in VertexFormat::LAYOUT {
            if !format.contains(flag) {
                continue;
            }
            let Some(offset) = format.attribute_offset(attribute) else {
                continue;
            };
            let normalized = attribute == VertexAttribute::Color;
            let components = if normalized { 4 } else { (size / 4) as u8 };
            elements[attribute.index()] = Some(VertexElement {
                components,
                offset,
                normalized,
            });
            features |= PipelineFeature::vertex_attribute(attribute);
        }

        Self {
            format,
            vertex_size: format.vertex_size(),
            elements,
            features,
        }
    }

    #[must_use]
    pub fn element(&self, attribute: VertexAttribute) -> Option<&VertexElement> {
        self.elements[attribute.index()].as_ref()
    }
}
