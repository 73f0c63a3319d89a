//! Permutation Cache
//!
//! Compiled programs keyed by `(ProgramId, PipelineFeatures)`.
//!
//! Only successful compiles are inserted, so a broken permutation is
//! compiled again on every request. With a capacity set, inserting past it
//! evicts the least recently used permutation; the evicted driver programs
//! are returned to the caller for deletion.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::renderer::pipeline::feature_layout::PipelineFeatures;
use crate::renderer::resource_ids::{ConstantBufferId, ProgramId};
use crate::renderer::state::MAX_CONSTANT_BUFFERS;
use crate::renderer::uniform_layout::UniformType;

use super::driver::ProgramHandle;

/// A uniform of a permutation, mapped to a constant buffer element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermutationUniform {
    /// Element name inside the buffer layout.
    pub name: String,
    pub location: i32,
    pub ty: UniformType,
    pub array_size: u16,
    /// Constant buffer slot the uniform reads from.
    pub slot: u8,
    /// Hash of the element name inside the buffer layout.
    pub name_hash: u64,
}

/// Identifies the contents of a constant buffer at the time of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRevision {
    pub id: ConstantBufferId,
    pub value: u64,
}

#[derive(Debug, Clone)]
pub struct Permutation {
    pub program: ProgramHandle,
    pub uniforms: SmallVec<[PermutationUniform; 8]>,
    /// Revision last uploaded per constant buffer slot.
    pub revisions: [Option<BufferRevision>; MAX_CONSTANT_BUFFERS],
    last_used: u64,
}

impl Permutation {
    #[must_use]
    pub fn new(program: ProgramHandle, uniforms: SmallVec<[PermutationUniform; 8]>) -> Self {
        Self {
            program,
            uniforms,
            revisions: [None; MAX_CONSTANT_BUFFERS],
            last_used: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct PermutationCache {
    entries: FxHashMap<(ProgramId, PipelineFeatures), Permutation>,
    capacity: Option<usize>,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl PermutationCache {
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Looks a permutation up, counting a hit or a miss.
    pub fn get(&mut self, program: ProgramId, features: PipelineFeatures) -> Option<&mut Permutation> {
        self.clock += 1;
        match self.entries.get_mut(&(program, features)) {
            Some(permutation) => {
                self.hits += 1;
                permutation.last_used = self.clock;
                Some(permutation)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Looks a permutation up without touching the counters or its age.
    pub fn find_mut(&mut self, program: ProgramId, features: PipelineFeatures) -> Option<&mut Permutation> {
        self.entries.get_mut(&(program, features))
    }

    #[must_use]
    pub fn contains(&self, program: ProgramId, features: PipelineFeatures) -> bool {
        self.entries.contains_key(&(program, features))
    }

    /// Caches a compiled permutation, returning the driver programs evicted
    /// to stay within the capacity.
    pub fn insert(
        &mut self,
        program: ProgramId,
        features: PipelineFeatures,
        mut permutation: Permutation,
    ) -> Vec<ProgramHandle> {
        self.clock += 1;
        permutation.last_used = self.clock;

        let mut evicted: Vec<_> = self
            .entries
            .insert((program, features), permutation)
            .map(|replaced| replaced.program)
            .into_iter()
            .collect();

        if let Some(capacity) = self.capacity {
            while self.entries.len() > capacity.max(1) {
                let Some(oldest) = self
                    .entries
                    .iter()
                    .min_by_key(|(_, p)| p.last_used)
                    .map(|(key, _)| *key)
                else {
                    break;
                };
                if let Some(removed) = self.entries.remove(&oldest) {
                    evicted.push(removed.program);
                }
            }
        }
        evicted
    }

    /// Drops every permutation of `program`.
    pub fn remove_program(&mut self, program: ProgramId) -> Vec<ProgramHandle> {
        let mut removed = Vec::new();
        self.entries.retain(|(id, _), permutation| {
            let keep = *id != program;
            if !keep {
                removed.push(permutation.program);
            }
            keep
        });
        removed
    }

    /// Forgets uploaded revisions of a deleted constant buffer.
    pub fn forget_constant_buffer(&mut self, id: ConstantBufferId) {
        for permutation in self.entries.values_mut() {
            for revision in &mut permutation.revisions {
                if revision.is_some_and(|r| r.id == id) {
                    *revision = None;
                }
            }
        }
    }

    pub fn drain(&mut self) -> Vec<ProgramHandle> {
        self.entries.drain().map(|(_, p)| p.program).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }
}
