//! Bidirectional mapping between target names and dense integer ids.
//!
//! The scheduler only ever sees `TargetId`s; this is the one place that
//! knows which path (or synthetic name) an id stands for.

use crate::canon::canon_path;
use anyhow::bail;
use rustc_hash::FxHashMap;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TargetId(usize);

impl TargetId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for TargetId {
    fn from(u: usize) -> TargetId {
        TargetId(u)
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A name<->id bijection.  Names are canonicalized on the way in.
#[derive(Default)]
pub struct Translator {
    ids: FxHashMap<String, TargetId>,
    /// Indexed by id; None for ids not (yet) bound.
    names: Vec<Option<String>>,
    /// Allocation scans forward from here for the next unbound id.
    cursor: usize,
}

impl Translator {
    pub fn new() -> Self {
        Translator::default()
    }

    fn is_bound(&self, id: TargetId) -> bool {
        matches!(self.names.get(id.index()), Some(Some(_)))
    }

    fn bind(&mut self, name: String, id: TargetId) {
        if id.index() >= self.names.len() {
            self.names.resize(id.index() + 1, None);
        }
        self.names[id.index()] = Some(name.clone());
        self.ids.insert(name, id);
    }

    fn allocate(&mut self, name: String) -> TargetId {
        while self.is_bound(TargetId(self.cursor)) {
            self.cursor += 1;
        }
        let id = TargetId(self.cursor);
        self.cursor += 1;
        self.bind(name, id);
        id
    }

    /// Bind a name to a specific id.  Fails if the name is bound to another
    /// id or the id is bound to another name.
    pub fn add(&mut self, name: &str, id: TargetId) -> anyhow::Result<()> {
        let name = canon_path(name)?;
        if let Some(bound) = self.name(id) {
            if bound != name {
                bail!("id {} already mapped to {:?}", id, bound);
            }
        }
        if let Some(&bound) = self.ids.get(&name) {
            if bound != id {
                bail!("path {:?} already mapped to {}", name, bound);
            }
            return Ok(());
        }
        self.bind(name, id);
        Ok(())
    }

    /// Look up the id for a name, allocating one on first use.
    pub fn get(&mut self, name: &str) -> anyhow::Result<TargetId> {
        let name = canon_path(name)?;
        if let Some(&id) = self.ids.get(&name) {
            return Ok(id);
        }
        Ok(self.allocate(name))
    }

    pub fn get_all(&mut self, names: &[String]) -> anyhow::Result<Vec<TargetId>> {
        names.iter().map(|name| self.get(name)).collect()
    }

    pub fn name(&self, id: TargetId) -> Option<&str> {
        self.names.get(id.index()).and_then(|name| name.as_deref())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.names.clear();
        self.cursor = 0;
    }
}
