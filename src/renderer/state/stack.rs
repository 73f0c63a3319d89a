//! State Stack
//!
//! LIFO composition of the blocks active while a draw is recorded. Entries
//! are either scoped blocks, created for the current frame and dropped on
//! pop, or shared blocks that outlive the frame (material and pass defaults).
//!
//! Each push returns a [`ScopeToken`] naming the depth it created. Popping
//! with a token that does not name the top entry is an error, so scopes can
//! only be closed in reverse order of creation. The closure helpers on
//! [`RenderFrame`](crate::renderer::frame::RenderFrame) pair pushes and pops
//! automatically.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::errors::{RenderError, Result};
use crate::renderer::settings::{DEFAULT_MAX_STATE_STACK_DEPTH, DEFAULT_STATE_BLOCK_CAPACITY};

use super::StateBlock;

#[derive(Debug, Clone)]
enum StackEntry {
    Scoped(StateBlock),
    Shared(Arc<StateBlock>),
}

impl StackEntry {
    fn block(&self) -> &StateBlock {
        match self {
            Self::Scoped(block) => block,
            Self::Shared(block) => block,
        }
    }
}

/// Proof of a push; must be handed back to [`StateStack::pop`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pushed scope has to be popped with its token"]
pub struct ScopeToken {
    depth: usize,
}

impl ScopeToken {
    /// Stack size right after the push that produced this token.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[derive(Debug, Clone)]
pub struct StateStack {
    entries: SmallVec<[StackEntry; DEFAULT_MAX_STATE_STACK_DEPTH]>,
    max_depth: usize,
    block_capacity: usize,
}

impl StateStack {
    #[must_use]
    pub fn new(max_depth: usize, block_capacity: usize) -> Self {
        Self {
            entries: SmallVec::new(),
            max_depth,
            block_capacity,
        }
    }

    /// Pushes a new empty scoped block; fill it through [`top_mut`](Self::top_mut).
    pub fn push_scope(&mut self) -> Result<ScopeToken> {
        self.push_entry(StackEntry::Scoped(StateBlock::with_capacity(self.block_capacity)))
    }

    /// Pushes a block shared across frames without copying it.
    pub fn push_shared(&mut self, block: Arc<StateBlock>) -> Result<ScopeToken> {
        self.push_entry(StackEntry::Shared(block))
    }

    fn push_entry(&mut self, entry: StackEntry) -> Result<ScopeToken> {
        if self.entries.len() >= self.max_depth {
            return Err(RenderError::StateStackOverflow {
                depth: self.max_depth,
            });
        }
        self.entries.push(entry);
        Ok(ScopeToken {
            depth: self.entries.len(),
        })
    }

    /// The top block, if it is a scoped (mutable) one.
    pub fn top_mut(&mut self) -> Option<&mut StateBlock> {
        match self.entries.last_mut() {
            Some(StackEntry::Scoped(block)) => Some(block),
            _ => None,
        }
    }

    #[must_use]
    pub fn top(&self) -> Option<&StateBlock> {
        self.entries.last().map(StackEntry::block)
    }

    /// Pops the entry created by `token`.
    pub fn pop(&mut self, token: ScopeToken) -> Result<()> {
        let size = self.entries.len();
        if size == 0 {
            return Err(RenderError::StateStackUnderflow);
        }
        if token.depth != size {
            return Err(RenderError::ScopeOrderViolation {
                expected: size,
                actual: token.depth,
            });
        }
        self.entries.pop();
        Ok(())
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.block_capacity
    }

    /// Active blocks, newest first.
    pub fn blocks(&self) -> impl Iterator<Item = &StateBlock> {
        self.entries.iter().rev().map(StackEntry::block)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

impl Default for StateStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STATE_STACK_DEPTH, DEFAULT_STATE_BLOCK_CAPACITY)
    }
}
