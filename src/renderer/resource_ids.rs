//! Resource Identifiers
//!
//! Every render resource is addressed through a small integer handle issued
//! immediately at request time, long before the driver object exists.
//!
//! # Design
//!
//! 1. **Typed ids**: one `u16` newtype per resource category, so a vertex
//!    buffer id can never be bound as a texture.
//! 2. **`IdentifierPool`**: issues ids per category and reuses released ones,
//!    lowest first. Id `0` is reserved as the invalid handle.
//! 3. **`ResourceIdentifiers`**: the set of pools owned by a rendering context.

use std::fmt;
use std::marker::PhantomData;

use smallvec::SmallVec;

use crate::errors::{RenderError, Result};

/// Category of a render resource, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    InputLayout,
    VertexBuffer,
    IndexBuffer,
    ConstantBuffer,
    UniformLayout,
    Program,
    Texture,
    FeatureLayout,
    VertexShader,
    FragmentShader,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InputLayout => "input layout",
            Self::VertexBuffer => "vertex buffer",
            Self::IndexBuffer => "index buffer",
            Self::ConstantBuffer => "constant buffer",
            Self::UniformLayout => "uniform layout",
            Self::Program => "program",
            Self::Texture => "texture",
            Self::FeatureLayout => "feature layout",
            Self::VertexShader => "vertex shader",
            Self::FragmentShader => "fragment shader",
        };
        f.write_str(name)
    }
}

/// Implemented by every typed persistent resource id.
pub trait ResourceId: Copy + Eq + fmt::Debug {
    const KIND: ResourceKind;

    fn from_raw(value: u16) -> Self;

    fn raw(self) -> u16;

    #[inline]
    fn index(self) -> usize {
        usize::from(self.raw())
    }

    #[inline]
    fn is_valid(self) -> bool {
        self.raw() != 0
    }
}

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(u16);

        impl $name {
            /// The invalid handle.
            pub const INVALID: Self = Self(0);

            #[inline]
            #[must_use]
            pub const fn new(value: u16) -> Self {
                Self(value)
            }

            #[inline]
            #[must_use]
            pub const fn raw(self) -> u16 {
                self.0
            }

            #[inline]
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl ResourceId for $name {
            const KIND: ResourceKind = ResourceKind::$kind;

            #[inline]
            fn from_raw(value: u16) -> Self {
                Self(value)
            }

            #[inline]
            fn raw(self) -> u16 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

resource_id!(
    /// Handle to an input layout created from a vertex format.
    InputLayoutId => InputLayout
);
resource_id!(VertexBufferId => VertexBuffer);
resource_id!(IndexBufferId => IndexBuffer);
resource_id!(ConstantBufferId => ConstantBuffer);
resource_id!(
    /// Handle to a registered constant buffer layout.
    UniformLayoutId => UniformLayout
);
resource_id!(
    /// Handle to a shader program; each program owns many compiled permutations.
    ProgramId => Program
);
resource_id!(TextureId => Texture);
resource_id!(FeatureLayoutId => FeatureLayout);
resource_id!(VertexShaderId => VertexShader);
resource_id!(FragmentShaderId => FragmentShader);

/// Command-buffer-local handle of a transient texture.
///
/// Valid values are `1..=254`; `0` is invalid. The same value may name
/// different textures at different nesting levels of command buffer execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransientTextureId(u8);

impl TransientTextureId {
    pub const INVALID: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

// ─── Identifier pool ──────────────────────────────────────────────────────────

/// Issues and recycles ids of one resource category.
#[derive(Debug, Clone)]
pub struct IdentifierPool<T: ResourceId> {
    /// Next never-issued id.
    next: u16,
    /// Released ids, kept sorted in descending order so `pop` yields the lowest.
    released: SmallVec<[u16; 16]>,
    live: usize,
    _marker: PhantomData<T>,
}

impl<T: ResourceId> Default for IdentifierPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ResourceId> IdentifierPool<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: 1,
            released: SmallVec::new(),
            live: 0,
            _marker: PhantomData,
        }
    }

    /// Issues an id, reusing the lowest released one first.
    pub fn acquire(&mut self) -> Result<T> {
        let raw = if let Some(raw) = self.released.pop() {
            raw
        } else {
            if self.next == u16::MAX {
                return Err(RenderError::IdentifierPoolExhausted { kind: T::KIND });
            }
            let raw = self.next;
            self.next += 1;
            raw
        };

        self.live += 1;
        Ok(T::from_raw(raw))
    }

    /// Returns an id to the pool. Releasing an invalid or free id is an error.
    pub fn release(&mut self, id: T) -> Result<()> {
        if !self.is_allocated(id) {
            return Err(RenderError::InvalidResource {
                kind: T::KIND,
                id: id.raw(),
            });
        }

        let raw = id.raw();
        let position = self.released.partition_point(|&r| r > raw);
        self.released.insert(position, raw);
        self.live -= 1;
        Ok(())
    }

    #[must_use]
    pub fn is_allocated(&self, id: T) -> bool {
        id.is_valid() && id.raw() < self.next && !self.released.contains(&id.raw())
    }

    /// Number of ids currently issued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

/// One identifier pool per persistent resource category.
#[derive(Debug, Default, Clone)]
pub struct ResourceIdentifiers {
    pub input_layouts: IdentifierPool<InputLayoutId>,
    pub vertex_buffers: IdentifierPool<VertexBufferId>,
    pub index_buffers: IdentifierPool<IndexBufferId>,
    pub constant_buffers: IdentifierPool<ConstantBufferId>,
    pub uniform_layouts: IdentifierPool<UniformLayoutId>,
    pub programs: IdentifierPool<ProgramId>,
    pub textures: IdentifierPool<TextureId>,
    pub feature_layouts: IdentifierPool<FeatureLayoutId>,
}

/// Dense storage indexed by a typed id; slot `0` is always empty.
#[derive(Debug, Clone)]
pub struct ResourceTable<T: ResourceId, V> {
    slots: Vec<Option<V>>,
    _marker: PhantomData<T>,
}

impl<T: ResourceId, V> Default for ResourceTable<T, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ResourceId, V> ResourceTable<T, V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![None],
            _marker: PhantomData,
        }
    }

    /// Stores `value` at `id`, returning the previous occupant.
    pub fn insert(&mut self, id: T, value: V) -> Option<V> {
        let index = id.index();
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index].replace(value)
    }

    pub fn remove(&mut self, id: T) -> Option<V> {
        self.slots.get_mut(id.index()).and_then(Option::take)
    }

    #[must_use]
    pub fn get(&self, id: T) -> Option<&V> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: T) -> Option<&mut V> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Like [`get`](Self::get) but reports a missing resource as an error.
    pub fn try_get(&self, id: T) -> Result<&V> {
        self.get(id).ok_or(RenderError::InvalidResource {
            kind: T::KIND,
            id: id.raw(),
        })
    }

    pub fn try_get_mut(&mut self, id: T) -> Result<&mut V> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(RenderError::InvalidResource {
                kind: T::KIND,
                id: id.raw(),
            })
    }

    #[must_use]
    pub fn contains(&self, id: T) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (T, &V)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (T::from_raw(i as u16), v)))
    }

    /// Empties the table, returning the removed values with their ids.
    pub fn drain(&mut self) -> Vec<(T, V)> {
        let slots = std::mem::replace(&mut self.slots, vec![None]);
        slots
            .into_iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|v| (T::from_raw(i as u16), v)))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
