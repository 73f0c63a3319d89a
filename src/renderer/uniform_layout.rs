//! Uniform Buffer Layouts
//!
//! A constant buffer is plain CPU-side bytes plus a [`UniformBufferLayout`]
//! describing where each named value lives. The layout is shared between
//! two consumers:
//!
//! - **Shader generation** turns it into a GLSL struct declaration bound to a
//!   `cb_<slot>` uniform (see [`UniformBufferLayout::generate_definition`]).
//! - **Uniform upload** finds the element whose name hash matches an active
//!   uniform reported by the driver and reads its bytes from the buffer.
//!
//! Elements are kept sorted by byte offset regardless of declaration order.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_64;

use crate::errors::Result;
use crate::renderer::resource_ids::{ResourceTable, UniformLayoutId};

/// Scalar, vector or matrix type of a uniform element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Integer,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Matrix4,
}

impl UniformType {
    /// Size of a single value in bytes.
    #[must_use]
    pub const fn size_of(self) -> usize {
        match self {
            Self::Integer | Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Matrix4 => 64,
        }
    }

    #[must_use]
    pub const fn glsl_name(self) -> &'static str {
        match self {
            Self::Integer => "int",
            Self::Float => "float",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::Matrix4 => "mat4",
        }
    }

    /// Parses a GLSL type name, as reported by driver introspection.
    #[must_use]
    pub fn from_glsl_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(Self::Integer),
            "float" => Some(Self::Float),
            "vec2" => Some(Self::Vec2),
            "vec3" => Some(Self::Vec3),
            "vec4" => Some(Self::Vec4),
            "mat4" => Some(Self::Matrix4),
            _ => None,
        }
    }
}

/// Hashes a uniform name the same way layouts and permutations do.
#[inline]
#[must_use]
pub fn uniform_name_hash(name: &str) -> u64 {
    xxh3_64(name.as_bytes())
}

/// One named value inside a constant buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformElement {
    pub name: String,
    pub ty: UniformType,
    /// Byte offset inside the constant buffer.
    pub offset: usize,
    /// Array length, `0` for a single value.
    pub array_size: u16,
    name_hash: u64,
}

impl UniformElement {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: UniformType, offset: usize) -> Self {
        let name = name.into();
        let name_hash = uniform_name_hash(&name);
        Self {
            name,
            ty,
            offset,
            array_size: 0,
            name_hash,
        }
    }

    #[must_use]
    pub fn array(name: impl Into<String>, ty: UniformType, offset: usize, array_size: u16) -> Self {
        Self {
            array_size,
            ..Self::new(name, ty, offset)
        }
    }

    #[inline]
    #[must_use]
    pub fn name_hash(&self) -> u64 {
        self.name_hash
    }

    /// Bytes occupied by this element, counting every array entry.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.ty.size_of() * usize::from(self.array_size.max(1))
    }
}

/// Named, offset-sorted list of uniform elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBufferLayout {
    name: String,
    elements: Vec<UniformElement>,
}

impl UniformBufferLayout {
    /// Creates a layout, sorting `elements` by offset.
    #[must_use]
    pub fn new(name: impl Into<String>, mut elements: Vec<UniformElement>) -> Self {
        elements.sort_by_key(|e| e.offset);
        Self {
            name: name.into(),
            elements,
        }
    }

    /// Layout type name, used as the generated GLSL struct name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn elements(&self) -> &[UniformElement] {
        &self.elements
    }

    #[must_use]
    pub fn find(&self, name_hash: u64) -> Option<&UniformElement> {
        self.elements.iter().find(|e| e.name_hash == name_hash)
    }

    /// Minimum size of a buffer holding every element.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.elements
            .iter()
            .map(|e| e.offset + e.byte_size())
            .max()
            .unwrap_or(0)
    }

    /// Generates the GLSL declaration of this layout bound to slot `slot`.
    ///
    /// ```text
    /// struct Instance {
    ///     mat4 transform;
    /// }; uniform Instance cb_1;
    /// #define Instance cb_1
    /// ```
    #[must_use]
    pub fn generate_definition(&self, slot: u8, binding_name: &str) -> String {
        let mut definition = format!("struct {} {{\n", self.name);
        for element in &self.elements {
            let ty = element.ty.glsl_name();
            let declaration = if element.array_size > 0 {
                format!("\t{ty} {}[{}];\n", element.name, element.array_size)
            } else {
                format!("\t{ty} {};\n", element.name)
            };
            definition.push_str(&declaration);
        }
        definition.push_str(&format!(
            "}}; uniform {name} cb_{slot};\n#define {binding_name} cb_{slot}\n",
            name = self.name
        ));
        definition
    }
}

/// Uniform layouts registered with the rendering context, addressable by id
/// and by type name.
#[derive(Debug, Default)]
pub struct UniformLayouts {
    layouts: ResourceTable<UniformLayoutId, Arc<UniformBufferLayout>>,
    by_name: FxHashMap<String, UniformLayoutId>,
}

impl UniformLayouts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `layout` under `id`. A later layout with the same name
    /// shadows the earlier one for name lookups.
    pub fn insert(&mut self, id: UniformLayoutId, layout: UniformBufferLayout) {
        self.by_name.insert(layout.name().to_owned(), id);
        self.layouts.insert(id, Arc::new(layout));
    }

    pub fn get(&self, id: UniformLayoutId) -> Result<&Arc<UniformBufferLayout>> {
        self.layouts.try_get(id)
    }

    /// Finds a layout by its type name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&UniformBufferLayout> {
        let id = self.by_name.get(name)?;
        self.layouts.get(*id).map(Arc::as_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

/// A value ready to be written into a uniform location.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Integer(i32),
    Float(f32),
    Vec2(Vec<Vec2>),
    Vec3(Vec<Vec3>),
    Vec4(Vec<Vec4>),
    Matrix4(Mat4),
}

impl UniformValue {
    /// Decodes `count` values of type `ty` from the start of `bytes`.
    ///
    /// Returns `None` if `bytes` is too short.
    #[must_use]
    pub fn decode(ty: UniformType, bytes: &[u8], count: usize) -> Option<Self> {
        let count = count.max(1);
        let needed = ty.size_of() * count;
        let bytes = bytes.get(..needed)?;
        let floats = |n: usize| -> Vec<f32> {
            bytes
                .chunks_exact(4)
                .take(n)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        };

        Some(match ty {
            UniformType::Integer => Self::Integer(bytemuck::pod_read_unaligned(&bytes[..4])),
            UniformType::Float => Self::Float(bytemuck::pod_read_unaligned(&bytes[..4])),
            UniformType::Vec2 => Self::Vec2(
                floats(count * 2)
                    .chunks_exact(2)
                    .map(Vec2::from_slice)
                    .collect(),
            ),
            UniformType::Vec3 => Self::Vec3(
                floats(count * 3)
                    .chunks_exact(3)
                    .map(Vec3::from_slice)
                    .collect(),
            ),
            UniformType::Vec4 => Self::Vec4(
                floats(count * 4)
                    .chunks_exact(4)
                    .map(Vec4::from_slice)
                    .collect(),
            ),
            UniformType::Matrix4 => Self::Matrix4(Mat4::from_cols_slice(&floats(16))),
        })
    }
}
