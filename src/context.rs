//! Typed, immutable workflow context.
//!
//! `WorkflowContext` is the only legitimate way nodes and the interpreter
//! share side data alongside the primary `S` payload of a
//! [`GraphWorkflowState`](crate::state::GraphWorkflowState). It behaves like
//! an immutable map keyed by [`ContextKey<T>`] rather than by bare strings,
//! so two keys with the same name but different `T` are distinct entries —
//! this is the same "channel" discipline the teacher crate applies to its
//! `messages`/`extra`/`errors` channels, generalized to arbitrary typed
//! values instead of three fixed slots.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use rustc_hash::FxHashMap;

/// A typed key into a [`WorkflowContext`].
///
/// Two keys are equal only if both their `name` and their `T` agree; the
/// type is folded into the internal map key via `std::any::type_name`, so
/// `ContextKey::<u32>::new("count")` and `ContextKey::<String>::new("count")`
/// address different slots.
pub struct ContextKey<T> {
    name: Arc<str>,
    type_name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Creates a new context key with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            type_name: std::any::type_name::<T>(),
            _marker: PhantomData,
        }
    }

    /// The key's name, as registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn slot(&self) -> Slot {
        Slot {
            name: self.name.clone(),
            type_name: self.type_name,
        }
    }
}

// Manual impls: derive(Clone/Debug/...) would require T: Clone/Debug, which
// we don't need since the key never stores a T.
impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            type_name: self.type_name,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextKey")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .finish()
    }
}

impl<T> PartialEq for ContextKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.type_name == other.type_name
    }
}
impl<T> Eq for ContextKey<T> {}

#[derive(Clone, PartialEq, Eq, Hash)]
struct Slot {
    name: Arc<str>,
    type_name: &'static str,
}

pub(crate) type BoxedValue = Arc<dyn Any + Send + Sync>;

/// An immutable mapping from [`ContextKey<T>`] to values of type `T`.
///
/// Every mutating-looking method (`with`, `without`, `merge`) returns a new
/// `WorkflowContext`; the receiver is left untouched, matching invariant I4
/// ("State is a value; no operation mutates an existing snapshot").
#[derive(Clone, Default)]
pub struct WorkflowContext {
    entries: FxHashMap<Slot, BoxedValue>,
    /// Preserves the name of every key ever inserted, for `keys()` and for
    /// the suspension serializer's type-name lookup. Ordering is irrelevant
    /// to observers per the spec; this is just bookkeeping.
    names: FxHashMap<Slot, &'static str>,
}

impl WorkflowContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the value for `key`, if present.
    pub fn get<T: Send + Sync + 'static>(&self, key: &ContextKey<T>) -> Option<&T> {
        self.entries
            .get(&key.slot())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns a new context with `key` bound to `value`, replacing any
    /// existing entry under the same (name, type) slot.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(&self, key: &ContextKey<T>, value: T) -> Self {
        let mut entries = self.entries.clone();
        let mut names = self.names.clone();
        let slot = key.slot();
        entries.insert(slot.clone(), Arc::new(value));
        names.insert(slot, key.type_name);
        Self { entries, names }
    }

    /// Returns a new context with `key` removed, if present.
    #[must_use]
    pub fn without<T: Send + Sync + 'static>(&self, key: &ContextKey<T>) -> Self {
        let mut entries = self.entries.clone();
        let mut names = self.names.clone();
        let slot = key.slot();
        entries.remove(&slot);
        names.remove(&slot);
        Self { entries, names }
    }

    /// Right-biased merge: entries in `other` win over entries in `self`
    /// when both define the same slot. Used to fold branch contexts back
    /// into a parent at a Join, in declaration order (§4.3 Aggregation).
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut entries = self.entries.clone();
        let mut names = self.names.clone();
        for (slot, value) in &other.entries {
            entries.insert(slot.clone(), value.clone());
        }
        for (slot, type_name) in &other.names {
            names.insert(slot.clone(), type_name);
        }
        Self { entries, names }
    }

    /// All distinct key names currently bound (order is insertion-agnostic;
    /// callers must not depend on it).
    pub fn keys(&self) -> Vec<String> {
        self.names.keys().map(|slot| slot.name.to_string()).collect()
    }

    /// Number of bound entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries are bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entry_type_names(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.names.iter().map(|(slot, t)| (slot.name.as_ref(), *t))
    }

    /// Iterates every bound entry as `(name, type_name, boxed value)`, used
    /// by the suspension serializer to encode each context value alongside
    /// the type name needed to reconstruct it on restore (§4.6).
    pub(crate) fn raw_entries(&self) -> impl Iterator<Item = (&str, &'static str, &BoxedValue)> {
        self.entries
            .iter()
            .map(|(slot, value)| (slot.name.as_ref(), slot.type_name, value))
    }

    /// Rebuilds a context from previously serialized entries, given a
    /// reconstructor for each `(name, type_name)` pair. Entries whose
    /// reconstructor is missing or fails are dropped, matching §4.6's
    /// "unknown types are dropped with a warning rather than failing the
    /// whole restore".
    pub(crate) fn from_raw_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Arc<str>, &'static str, BoxedValue)>,
    {
        let mut ctx = Self::new();
        for (name, type_name, value) in entries {
            let slot = Slot { name, type_name };
            ctx.entries.insert(slot.clone(), value);
            ctx.names.insert(slot, type_name);
        }
        ctx
    }
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_with_roundtrip() {
        let key = ContextKey::<u32>::new("count");
        let ctx = WorkflowContext::new().with(&key, 7);
        assert_eq!(ctx.get(&key), Some(&7));
    }

    #[test]
    fn same_name_different_type_are_distinct() {
        let as_u32 = ContextKey::<u32>::new("x");
        let as_string = ContextKey::<String>::new("x");
        let ctx = WorkflowContext::new()
            .with(&as_u32, 1)
            .with(&as_string, "one".to_string());
        assert_eq!(ctx.get(&as_u32), Some(&1));
        assert_eq!(ctx.get(&as_string), Some(&"one".to_string()));
    }

    #[test]
    fn with_does_not_mutate_receiver() {
        let key = ContextKey::<u32>::new("count");
        let base = WorkflowContext::new();
        let updated = base.with(&key, 1);
        assert_eq!(base.get(&key), None);
        assert_eq!(updated.get(&key), Some(&1));
    }

    #[test]
    fn merge_is_right_biased() {
        let key = ContextKey::<u32>::new("count");
        let left = WorkflowContext::new().with(&key, 1);
        let right = WorkflowContext::new().with(&key, 2);
        let merged = left.merge(&right);
        assert_eq!(merged.get(&key), Some(&2));
    }

    #[test]
    fn without_removes_entry() {
        let key = ContextKey::<u32>::new("count");
        let ctx = WorkflowContext::new().with(&key, 1).without(&key);
        assert_eq!(ctx.get(&key), None);
    }
}
