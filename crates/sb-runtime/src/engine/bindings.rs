use std::collections::{HashMap, HashSet};

use rhai::{Dynamic, Scope};
use sb_core::{HostMap, HostValue};

use super::lookup::{DocumentLookup, NoLookup};
use crate::helpers::rhai_bridge::ValueBridge;

/// Where a materialized binding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingOrigin {
    Vars,
    Lookup,
    /// Written through `set_next_var`, never converted.
    Direct,
}

/// Variable table that converts host values into engine values only when a
/// key is first read.
///
/// Materialized entries live in the engine scope scripts evaluate against. A
/// key keeps its first converted value even if the backing entry changes,
/// except for lookup entries, which follow the lookup to its next document.
pub struct LazyVariableBindings<L = NoLookup> {
    vars: HostMap,
    lookup: Option<L>,
    scope: Scope<'static>,
    origins: HashMap<String, BindingOrigin>,
    unconverted: usize,
    lookup_advanced: bool,
    /// Set when the lookup moved on; `unconverted` no longer reflects its keys.
    pending_stale: bool,
    /// Names the current document does not have.
    lookup_misses: HashSet<String>,
}

impl LazyVariableBindings<NoLookup> {
    pub fn new(vars: HostMap) -> Self {
        let unconverted = vars.len();
        Self {
            vars,
            lookup: None,
            scope: Scope::new(),
            origins: HashMap::new(),
            unconverted,
            lookup_advanced: false,
            pending_stale: false,
            lookup_misses: HashSet::new(),
        }
    }
}

impl<L: DocumentLookup> LazyVariableBindings<L> {
    pub fn with_lookup(vars: HostMap, lookup: L) -> Self {
        let shadowed_by_lookup = lookup
            .keys()
            .iter()
            .filter(|key| !vars.contains_key(key.as_str()))
            .count();
        let unconverted = vars.len() + shadowed_by_lookup;
        Self {
            vars,
            lookup: Some(lookup),
            scope: Scope::new(),
            origins: HashMap::new(),
            unconverted,
            lookup_advanced: false,
            pending_stale: false,
            lookup_misses: HashSet::new(),
        }
    }

    /// Value bound to `key`, converting it on first access.
    pub fn get(&mut self, key: &str) -> Option<&Dynamic> {
        self.refresh_lookup_entries();
        if !self.scope.contains(key) {
            self.materialize(key);
        }
        self.scope.get(key)
    }

    /// Never converts anything.
    pub fn contains_key(&self, key: &str) -> bool {
        self.scope.contains(key)
            || self.vars.contains_key(key)
            || self
                .lookup
                .as_ref()
                .map_or(false, |lookup| lookup.contains_key(key))
    }

    pub fn len(&self) -> usize {
        self.scope.len() + self.unconverted()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unconverted(&self) -> usize {
        if self.pending_stale {
            self.count_pending()
        } else {
            self.unconverted
        }
    }

    pub fn is_materialized(&self, key: &str) -> bool {
        self.scope.contains(key)
    }

    pub fn origin(&self, key: &str) -> Option<BindingOrigin> {
        self.origins.get(key).copied()
    }

    pub fn keys(&mut self) -> Vec<String> {
        self.materialize_all();
        self.scope
            .iter_raw()
            .map(|(name, _, _)| name.to_string())
            .collect()
    }

    pub fn entries(&mut self) -> Vec<(String, Dynamic)> {
        self.materialize_all();
        self.scope
            .iter_raw()
            .map(|(name, _, value)| (name.to_string(), value.clone()))
            .collect()
    }

    pub fn values(&mut self) -> Vec<Dynamic> {
        self.materialize_all();
        self.scope
            .iter_raw()
            .map(|(_, _, value)| value.clone())
            .collect()
    }

    /// Replaces an entry of the backing host map. Already materialized keys
    /// keep their converted value.
    pub fn put_backing_var(&mut self, key: impl Into<String>, value: HostValue) -> Option<HostValue> {
        let key = key.into();
        let newly_pending = !self.contains_key(&key);
        let previous = self.vars.insert(key, value);
        if newly_pending {
            self.unconverted += 1;
        }
        previous
    }

    /// Converts the pending entries among `names`, the identifiers a compiled
    /// script reads.
    pub fn materialize_referenced(&mut self, names: &[String]) {
        self.refresh_lookup_entries();
        // Lookup keys change per document, so only a lookup-free table can skip.
        if self.unconverted == 0 && self.lookup.is_none() {
            return;
        }
        for name in names {
            if !self.scope.contains(name) {
                self.materialize(name);
            }
        }
    }

    /// Stores `value` as is, replacing whatever the key held.
    pub fn set_direct(&mut self, name: &str, value: Dynamic) {
        match self.scope.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                if self.is_pending(name) {
                    self.unconverted = self.unconverted.saturating_sub(1);
                }
                self.scope.push_dynamic(name.to_string(), value);
            }
        }
        self.origins.insert(name.to_string(), BindingOrigin::Direct);
    }

    /// Lookup entries materialized so far are re-read on the next access.
    pub fn mark_lookup_advanced(&mut self) {
        self.lookup_advanced = true;
        self.pending_stale = self.lookup.is_some();
        self.lookup_misses.clear();
    }

    pub fn lookup(&self) -> Option<&L> {
        self.lookup.as_ref()
    }

    pub fn lookup_mut(&mut self) -> Option<&mut L> {
        self.lookup.as_mut()
    }

    pub(crate) fn scope_mut(&mut self) -> &mut Scope<'static> {
        &mut self.scope
    }

    fn is_pending(&self, key: &str) -> bool {
        !self.scope.contains(key) && self.contains_key(key)
    }

    fn materialize(&mut self, key: &str) -> bool {
        let (value, origin) = match self.vars.get(key) {
            Some(value) => (ValueBridge::wrap(value), BindingOrigin::Vars),
            None => {
                if self.lookup_misses.contains(key) {
                    return false;
                }
                match self.lookup.as_ref().and_then(|lookup| lookup.get(key)) {
                    Some(value) => (ValueBridge::wrap(&value), BindingOrigin::Lookup),
                    None => {
                        if self.lookup.is_some() {
                            self.lookup_misses.insert(key.to_string());
                        }
                        return false;
                    }
                }
            }
        };
        self.scope.push_dynamic(key.to_string(), value);
        self.origins.insert(key.to_string(), origin);
        self.unconverted = self.unconverted.saturating_sub(1);
        true
    }

    fn materialize_all(&mut self) {
        self.refresh_lookup_entries();
        let mut pending: Vec<String> = self
            .vars
            .keys()
            .filter(|key| !self.scope.contains(key.as_str()))
            .cloned()
            .collect();
        if let Some(lookup) = &self.lookup {
            pending.extend(
                lookup
                    .keys()
                    .into_iter()
                    .filter(|key| !self.scope.contains(key) && !self.vars.contains_key(key)),
            );
        }
        for key in pending {
            self.materialize(&key);
        }
        self.unconverted = 0;
        self.pending_stale = false;
    }

    fn count_pending(&self) -> usize {
        let vars = self
            .vars
            .keys()
            .filter(|key| !self.scope.contains(key.as_str()))
            .count();
        let lookup = self.lookup.as_ref().map_or(0, |lookup| {
            lookup
                .keys()
                .iter()
                .filter(|key| {
                    !self.scope.contains(key.as_str()) && !self.vars.contains_key(key.as_str())
                })
                .count()
        });
        vars + lookup
    }

    fn refresh_lookup_entries(&mut self) {
        if !self.lookup_advanced {
            return;
        }
        self.lookup_advanced = false;
        let Some(lookup) = &self.lookup else {
            return;
        };
        for (name, origin) in &self.origins {
            if *origin != BindingOrigin::Lookup {
                continue;
            }
            let value = lookup
                .get(name)
                .map_or(Dynamic::UNIT, |value| ValueBridge::wrap(&value));
            if let Some(slot) = self.scope.get_mut(name) {
                *slot = value;
            }
        }
    }
}
