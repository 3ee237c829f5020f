//! # Missing-Aspect Resolution
//!
//! Given a class and the aspects/properties a node already has, compute the
//! aspects the node is still missing. A class requires:
//!
//! 1. itself, if it is an aspect
//! 2. each of its default aspects
//! 3. the owning aspect of every property present on the node
//!
//! and every newly required aspect is resolved the same way. Schemas may
//! declare default-aspect cycles, so class names are interned to integer ids
//! once and the recursion runs over ids with an explicit visited set.

use super::{ClassDef, Dictionary};
use crate::{PropertyMap, QName};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Result of a missing-aspect resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AspectClosure {
    /// Aspects the node must gain, in name order.
    pub missing: BTreeSet<QName>,
    /// Default property values contributed by the resolved class and the
    /// missing aspects. Callers only apply keys the node does not have yet.
    pub defaults: PropertyMap,
}

impl AspectClosure {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.defaults.is_empty()
    }
}

/// Interned view of the classes reached during one resolution.
struct Arena<'d> {
    dictionary: &'d dyn Dictionary,
    ids: HashMap<QName, usize>,
    classes: Vec<Option<Arc<ClassDef>>>,
}

impl<'d> Arena<'d> {
    fn new(dictionary: &'d dyn Dictionary) -> Self {
        Self {
            dictionary,
            ids: HashMap::new(),
            classes: Vec::new(),
        }
    }

    fn intern(&mut self, name: &QName) -> usize {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.classes.len();
        self.classes.push(self.dictionary.get_class(name));
        self.ids.insert(name.clone(), id);
        id
    }

    fn class(&self, id: usize) -> Option<&Arc<ClassDef>> {
        self.classes.get(id).and_then(Option::as_ref)
    }
}

/// Resolve the aspects missing from a node of (or gaining) `class`.
///
/// Unknown class names contribute nothing. Deterministic: the result depends
/// only on the dictionary contents and the inputs, never on iteration order.
pub fn resolve_missing_aspects<'a>(
    dictionary: &dyn Dictionary,
    class: &QName,
    existing_aspects: &BTreeSet<QName>,
    property_keys: impl IntoIterator<Item = &'a QName>,
) -> AspectClosure {
    let mut arena = Arena::new(dictionary);
    let mut visited = BTreeSet::new();
    let mut closure = AspectClosure::default();

    let root = arena.intern(class);
    visit(&mut arena, root, existing_aspects, &mut visited, &mut closure);

    // Aspects owning properties the node already carries.
    let owners: BTreeSet<QName> = property_keys
        .into_iter()
        .filter_map(|key| dictionary.get_property(key))
        .map(|def| def.owner.clone())
        .collect();
    for owner in owners {
        let id = arena.intern(&owner);
        if arena.class(id).is_some_and(|c| c.is_aspect()) {
            visit(&mut arena, id, existing_aspects, &mut visited, &mut closure);
        }
    }

    closure
}

fn visit(
    arena: &mut Arena<'_>,
    id: usize,
    existing: &BTreeSet<QName>,
    visited: &mut BTreeSet<usize>,
    closure: &mut AspectClosure,
) {
    if !visited.insert(id) {
        return;
    }
    let Some(class) = arena.class(id).cloned() else {
        return;
    };

    if class.is_aspect() && !existing.contains(&class.name) {
        closure.missing.insert(class.name.clone());
    }
    for (name, value) in class.default_values() {
        closure
            .defaults
            .entry(name.clone())
            .or_insert_with(|| value.clone());
    }

    let mut next: Vec<usize> = Vec::with_capacity(class.default_aspects.len());
    for aspect in &class.default_aspects {
        next.push(arena.intern(aspect));
    }
    for aspect_id in next {
        visit(arena, aspect_id, existing, visited, closure);
    }
}

// =============================================================================
// TESTS
// =============================================================================
