//! # Dictionary Model
//!
//! The engine never hardcodes type-specific behaviour. Everything type driven
//! (default aspects, default property values, archival policy, association
//! uniqueness and timestamp propagation) is read through the [`Dictionary`]
//! trait, which may change at runtime.
//!
//! - [`qnames`]: well-known names of the system and content models
//! - [`InMemoryDictionary`]: reference implementation, built from specs or TOML
//! - [`closure`]: missing-aspect resolution over a possibly cyclic schema

pub mod closure;
mod memory;
pub mod qnames;
mod system;

pub use closure::{AspectClosure, resolve_missing_aspects};
pub use memory::{
    AssociationSpec, ClassSpec, DictionaryBuilder, InMemoryDictionary, ModelDocument, PropertySpec,
};
pub use system::system_model;

use crate::{PropertyMap, PropertyValue, QName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// DEFINITIONS
// =============================================================================

/// Whether a class is a node type or an aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Type,
    Aspect,
}

/// Data type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Text,
    Bool,
    Long,
    Date,
    NodeRef,
    ChildAssocRef,
    Any,
}

/// A property definition, owned by exactly one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: QName,
    pub owner: QName,
    pub data_type: DataType,
    pub default: Option<PropertyValue>,
    pub mandatory: bool,
}

/// Effective class definition: inherited members are already folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub name: QName,
    pub kind: ClassKind,
    pub parent: Option<QName>,
    /// Aspects every instance of the class must carry.
    pub default_aspects: Vec<QName>,
    pub properties: BTreeMap<QName, PropertyDef>,
    /// Archival flag; `None` defers to other classes or the store default.
    pub archive: Option<bool>,
    /// Associations whose source is this class (or an ancestor).
    pub associations: Vec<QName>,
}

impl ClassDef {
    #[must_use]
    pub fn is_aspect(&self) -> bool {
        self.kind == ClassKind::Aspect
    }

    /// Default values declared by the class's properties.
    pub fn default_values(&self) -> impl Iterator<Item = (&QName, &PropertyValue)> {
        self.properties
            .values()
            .filter_map(|p| p.default.as_ref().map(|v| (&p.name, v)))
    }

    /// Copy missing default values into `properties`. Returns true if any were added.
    pub fn apply_default_values(&self, properties: &mut PropertyMap) -> bool {
        let mut added = false;
        for (name, value) in self.default_values() {
            if !properties.contains_key(name) {
                properties.insert(name.clone(), value.clone());
                added = true;
            }
        }
        added
    }
}

/// Whether an association is hierarchical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocKind {
    Child,
    Peer,
}

/// Association definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDef {
    pub name: QName,
    pub kind: AssocKind,
    /// Class that declares the association. If this is an aspect, the source
    /// node must carry it.
    pub source_class: QName,
    pub target_class: Option<QName>,
    /// Child associations only: siblings may share a name.
    pub duplicate_child_names: bool,
    /// Child associations only: changes touch the parent's modification stamp.
    pub propagate_timestamps: bool,
    /// Peer associations only: the same (source, target) pair may repeat.
    pub allow_duplicates: bool,
}

impl AssociationDef {
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.kind == AssocKind::Child
    }
}

// =============================================================================
// DICTIONARY TRAIT
// =============================================================================

/// Narrow query interface onto the schema.
pub trait Dictionary: Send + Sync {
    /// Any class, type or aspect.
    fn get_class(&self, name: &QName) -> Option<Arc<ClassDef>>;

    fn get_property(&self, name: &QName) -> Option<Arc<PropertyDef>>;

    fn get_association(&self, name: &QName) -> Option<Arc<AssociationDef>>;

    fn get_type(&self, name: &QName) -> Option<Arc<ClassDef>> {
        self.get_class(name).filter(|c| c.kind == ClassKind::Type)
    }

    fn get_aspect(&self, name: &QName) -> Option<Arc<ClassDef>> {
        self.get_class(name).filter(|c| c.kind == ClassKind::Aspect)
    }

    /// Whether `class` is `ancestor` or inherits from it.
    fn is_subclass(&self, class: &QName, ancestor: &QName) -> bool {
        let mut current = Some(class.clone());
        let mut hops = 0usize;
        while let Some(name) = current {
            if &name == ancestor {
                return true;
            }
            hops = hops.saturating_add(1);
            if hops > 64 {
                return false;
            }
            current = self.get_class(&name).and_then(|c| c.parent.clone());
        }
        false
    }
}
