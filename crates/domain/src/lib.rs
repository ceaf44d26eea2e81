//! Tracks, per registered type, which and-blocks of a query are known to be
//! backed by the *complete* matching data set rather than whatever happens
//! to be resident in memory.
//!
//! A cache only ever holds what callers have put into it; `GetMany`/`EvalQuery`
//! results are only as trustworthy as the caller's own knowledge of what's
//! been loaded. Declaring a domain (the whole type, or a specific and-block)
//! lets a caller assert "everything matching this has been loaded", after
//! which queries subsumed by that declaration can be treated as
//! authoritative instead of merely best-effort.

use std::collections::{HashMap, HashSet};

use cachecore_primitives::TypeName;
use cachecore_query::{AndBlock, Query};
use serde::{Deserialize, Serialize};

/// The payload of a `DeclareDomain` call: what the caller asserts is
/// complete. `fully_loaded` and `covered` are independent — a caller can
/// assert both at once (e.g. "everything, and in particular this subset").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainDescription {
    pub fully_loaded: bool,
    pub covered: Vec<AndBlock>,
}

impl DomainDescription {
    pub fn fully_loaded() -> Self {
        Self {
            fully_loaded: true,
            covered: Vec::new(),
        }
    }

    pub fn covering(blocks: Vec<AndBlock>) -> Self {
        Self {
            fully_loaded: false,
            covered: blocks,
        }
    }
}

/// How a [`DomainTracker::declare`] call applies a [`DomainDescription`] to
/// the existing state of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclareMode {
    /// Replaces both the fully-loaded flag and the covered set outright.
    Set,
    /// Unions the described covered set into the existing one;
    /// `fully_loaded` becomes true if it already was, or the description
    /// sets it.
    Add,
    /// Clears `fully_loaded` and removes the described and-blocks from the
    /// covered set.
    Remove,
}

#[derive(Debug, Default, Clone)]
struct DomainState {
    fully_loaded: bool,
    covered: HashSet<AndBlock>,
}

/// Per-type domain-completeness state for every registered type.
#[derive(Debug, Default)]
pub struct DomainTracker {
    per_type: HashMap<TypeName, DomainState>,
}

impl DomainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, type_name: impl Into<TypeName>, description: DomainDescription, mode: DeclareMode) {
        let state = self.per_type.entry(type_name.into()).or_default();
        match mode {
            DeclareMode::Set => {
                state.fully_loaded = description.fully_loaded;
                state.covered = description.covered.into_iter().collect();
            }
            DeclareMode::Add => {
                state.fully_loaded = state.fully_loaded || description.fully_loaded;
                state.covered.extend(description.covered);
            }
            DeclareMode::Remove => {
                state.fully_loaded = false;
                for block in &description.covered {
                    state.covered.remove(block);
                }
            }
        }
    }

    pub fn is_fully_loaded(&self, type_name: &TypeName) -> bool {
        self.per_type.get(type_name).map_or(false, |s| s.fully_loaded)
    }

    /// True if every and-block of `query` is guaranteed to be backed by a
    /// complete data set: either the whole type is declared fully loaded, or
    /// each branch of the query is subsumed by some declared and-block.
    ///
    /// A declared block `D` subsumes a query block `Q` when every predicate
    /// of `D` also appears in `Q` — `Q` can only be at least as selective as
    /// `D`, so if `D`'s matches are known complete, so are `Q`'s.
    pub fn is_authoritative(&self, type_name: &TypeName, query: &Query) -> bool {
        let Some(state) = self.per_type.get(type_name) else {
            return false;
        };
        if state.fully_loaded {
            return true;
        }
        query.or_blocks.iter().all(|block| {
            state.covered.iter().any(|declared| subsumes(declared, block))
        })
    }

    /// Drops all declared domains for `type_name`, e.g. on `Truncate`.
    pub fn reset(&mut self, type_name: &TypeName) {
        self.per_type.remove(type_name);
    }
}

fn subsumes(declared: &AndBlock, query_block: &AndBlock) -> bool {
    declared.predicates.iter().all(|p| query_block.predicates.contains(p))
}
