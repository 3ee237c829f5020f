//! In-memory dictionary built from declarative specs.
//!
//! Specs describe what a model author writes (own members only, defaults as
//! strings); [`DictionaryBuilder::build`] resolves inheritance into effective
//! [`ClassDef`]s. The dictionary can be redeployed or have classes undeployed
//! at runtime, which is how tenant models change under a running engine.

use super::{
    AssocKind, AssociationDef, ClassDef, ClassKind, DataType, Dictionary, PropertyDef,
};
use crate::{ArborError, PropertyValue, QName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

// =============================================================================
// SPECS
// =============================================================================

/// A property as declared in a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: QName,
    #[serde(default)]
    pub data_type: DataType,
    /// Default value in string form, converted according to `data_type`.
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub mandatory: bool,
}

impl PropertySpec {
    #[must_use]
    pub fn text(name: QName) -> Self {
        Self {
            name,
            data_type: DataType::Text,
            default: None,
            mandatory: false,
        }
    }

    #[must_use]
    pub fn of_type(name: QName, data_type: DataType) -> Self {
        Self {
            data_type,
            ..Self::text(name)
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    fn convert_default(&self) -> Result<Option<PropertyValue>, ArborError> {
        let Some(raw) = &self.default else {
            return Ok(None);
        };
        let bad = || {
            ArborError::InvalidArgument(format!(
                "default '{}' for {} is not a valid {:?}",
                raw, self.name, self.data_type
            ))
        };
        let value = match self.data_type {
            DataType::Text | DataType::Any => PropertyValue::Text(raw.clone()),
            DataType::Bool => match raw.to_ascii_uppercase().as_str() {
                "TRUE" => PropertyValue::Bool(true),
                "FALSE" => PropertyValue::Bool(false),
                _ => return Err(bad()),
            },
            DataType::Long => PropertyValue::Long(raw.parse().map_err(|_| bad())?),
            DataType::Date => PropertyValue::Date(raw.parse().map_err(|_| bad())?),
            DataType::NodeRef => PropertyValue::NodeRef(raw.parse()?),
            DataType::ChildAssocRef => return Err(bad()),
        };
        Ok(Some(value))
    }
}

/// A type or aspect as declared in a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub name: QName,
    #[serde(default)]
    pub parent: Option<QName>,
    #[serde(default)]
    pub default_aspects: Vec<QName>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
    #[serde(default)]
    pub archive: Option<bool>,
}

impl ClassSpec {
    #[must_use]
    pub fn new(name: QName) -> Self {
        Self {
            name,
            parent: None,
            default_aspects: Vec::new(),
            properties: Vec::new(),
            archive: None,
        }
    }

    #[must_use]
    pub fn parent(mut self, parent: QName) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn default_aspect(mut self, aspect: QName) -> Self {
        self.default_aspects.push(aspect);
        self
    }

    #[must_use]
    pub fn property(mut self, property: PropertySpec) -> Self {
        self.properties.push(property);
        self
    }

    #[must_use]
    pub fn archive(mut self, archive: bool) -> Self {
        self.archive = Some(archive);
        self
    }
}

/// An association as declared in a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationSpec {
    pub name: QName,
    pub source: QName,
    #[serde(default)]
    pub target: Option<QName>,
    /// Hierarchical (parent/child) rather than peer.
    #[serde(default)]
    pub child: bool,
    #[serde(default)]
    pub duplicate_child_names: bool,
    #[serde(default)]
    pub propagate_timestamps: bool,
    #[serde(default)]
    pub allow_duplicates: bool,
}

impl AssociationSpec {
    #[must_use]
    pub fn child(name: QName, source: QName) -> Self {
        Self {
            name,
            source,
            target: None,
            child: true,
            duplicate_child_names: false,
            propagate_timestamps: false,
            allow_duplicates: false,
        }
    }

    #[must_use]
    pub fn peer(name: QName, source: QName) -> Self {
        Self {
            child: false,
            ..Self::child(name, source)
        }
    }

    #[must_use]
    pub fn duplicate_names(mut self) -> Self {
        self.duplicate_child_names = true;
        self
    }

    #[must_use]
    pub fn propagating(mut self) -> Self {
        self.propagate_timestamps = true;
        self
    }

    #[must_use]
    pub fn duplicates_allowed(mut self) -> Self {
        self.allow_duplicates = true;
        self
    }
}

/// A model file: the TOML shape accepted by [`DictionaryBuilder::add_document`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDocument {
    #[serde(default)]
    pub types: Vec<ClassSpec>,
    #[serde(default)]
    pub aspects: Vec<ClassSpec>,
    #[serde(default)]
    pub associations: Vec<AssociationSpec>,
}

// =============================================================================
// BUILDER
// =============================================================================

/// Collects specs and resolves them into a dictionary.
#[derive(Debug, Clone, Default)]
pub struct DictionaryBuilder {
    classes: BTreeMap<QName, (ClassKind, ClassSpec)>,
    associations: BTreeMap<QName, AssociationSpec>,
}

impl DictionaryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add_type(mut self, spec: ClassSpec) -> Self {
        self.classes
            .insert(spec.name.clone(), (ClassKind::Type, spec));
        self
    }

    #[must_use]
    pub fn add_aspect(mut self, spec: ClassSpec) -> Self {
        self.classes
            .insert(spec.name.clone(), (ClassKind::Aspect, spec));
        self
    }

    #[must_use]
    pub fn add_association(mut self, spec: AssociationSpec) -> Self {
        self.associations.insert(spec.name.clone(), spec);
        self
    }

    #[must_use]
    pub fn add_document(self, doc: ModelDocument) -> Self {
        let mut builder = self;
        for spec in doc.types {
            builder = builder.add_type(spec);
        }
        for spec in doc.aspects {
            builder = builder.add_aspect(spec);
        }
        for spec in doc.associations {
            builder = builder.add_association(spec);
        }
        builder
    }

    /// Resolve inheritance and build an immutable definition set.
    pub fn build(self) -> Result<InMemoryDictionary, ArborError> {
        let definitions = self.resolve()?;
        Ok(InMemoryDictionary {
            builder: RwLock::new(self),
            definitions: RwLock::new(Arc::new(definitions)),
        })
    }

    fn resolve(&self) -> Result<Definitions, ArborError> {
        let mut defs = Definitions::default();

        // Property definitions belong to their declaring class.
        for (name, (_, spec)) in &self.classes {
            for prop in &spec.properties {
                let def = PropertyDef {
                    name: prop.name.clone(),
                    owner: name.clone(),
                    data_type: prop.data_type,
                    default: prop.convert_default()?,
                    mandatory: prop.mandatory,
                };
                defs.properties.insert(prop.name.clone(), Arc::new(def));
            }
        }

        for (name, spec) in &self.associations {
            let def = AssociationDef {
                name: name.clone(),
                kind: if spec.child {
                    AssocKind::Child
                } else {
                    AssocKind::Peer
                },
                source_class: spec.source.clone(),
                target_class: spec.target.clone(),
                duplicate_child_names: spec.duplicate_child_names,
                propagate_timestamps: spec.propagate_timestamps,
                allow_duplicates: spec.allow_duplicates,
            };
            defs.associations.insert(name.clone(), Arc::new(def));
        }

        for (name, (kind, _)) in &self.classes {
            let lineage = self.lineage(name)?;
            let mut default_aspects: Vec<QName> = Vec::new();
            let mut properties = BTreeMap::new();
            let mut archive = None;
            // Root-most ancestor first so subclasses override.
            for ancestor in lineage.iter().rev() {
                let Some((_, spec)) = self.classes.get(ancestor) else {
                    continue;
                };
                for aspect in &spec.default_aspects {
                    if !default_aspects.contains(aspect) {
                        default_aspects.push(aspect.clone());
                    }
                }
                for prop in &spec.properties {
                    if let Some(def) = defs.properties.get(&prop.name) {
                        properties.insert(prop.name.clone(), def.as_ref().clone());
                    }
                }
                if spec.archive.is_some() {
                    archive = spec.archive;
                }
            }
            let associations = self
                .associations
                .values()
                .filter(|a| lineage.contains(&a.source))
                .map(|a| a.name.clone())
                .collect();
            let parent = self.classes.get(name).and_then(|(_, s)| s.parent.clone());
            let def = ClassDef {
                name: name.clone(),
                kind: *kind,
                parent,
                default_aspects,
                properties,
                archive,
                associations,
            };
            defs.classes.insert(name.clone(), Arc::new(def));
        }

        Ok(defs)
    }

    /// The class followed by its ancestors, nearest first.
    fn lineage(&self, name: &QName) -> Result<Vec<QName>, ArborError> {
        let mut lineage = vec![name.clone()];
        let mut seen = BTreeSet::from([name.clone()]);
        let mut current = self.classes.get(name).and_then(|(_, s)| s.parent.clone());
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                return Err(ArborError::InvalidArgument(format!(
                    "class hierarchy of {} is cyclic at {}",
                    name, parent
                )));
            }
            current = self.classes.get(&parent).and_then(|(_, s)| s.parent.clone());
            lineage.push(parent);
        }
        Ok(lineage)
    }
}

// =============================================================================
// DICTIONARY
// =============================================================================

#[derive(Debug, Default)]
struct Definitions {
    classes: BTreeMap<QName, Arc<ClassDef>>,
    properties: BTreeMap<QName, Arc<PropertyDef>>,
    associations: BTreeMap<QName, Arc<AssociationDef>>,
}

/// Dictionary backed by resolved in-memory definitions.
#[derive(Debug)]
pub struct InMemoryDictionary {
    builder: RwLock<DictionaryBuilder>,
    definitions: RwLock<Arc<Definitions>>,
}

impl InMemoryDictionary {
    fn snapshot(&self) -> Arc<Definitions> {
        match self.definitions.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn redeploy(
        &self,
        change: impl FnOnce(&mut DictionaryBuilder),
    ) -> Result<(), ArborError> {
        let mut builder = self
            .builder
            .write()
            .map_err(|_| ArborError::IllegalState("dictionary lock poisoned".to_string()))?;
        let mut next = builder.clone();
        change(&mut next);
        let resolved = next.resolve()?;
        *builder = next;
        let mut defs = self
            .definitions
            .write()
            .map_err(|_| ArborError::IllegalState("dictionary lock poisoned".to_string()))?;
        *defs = Arc::new(resolved);
        Ok(())
    }

    /// Deploy an additional model document into the running dictionary.
    pub fn deploy(&self, doc: ModelDocument) -> Result<(), ArborError> {
        self.redeploy(|builder| {
            *builder = std::mem::take(builder).add_document(doc);
        })
    }

    /// Remove a class (and the properties it declares) from the dictionary.
    pub fn undeploy_class(&self, name: &QName) -> Result<(), ArborError> {
        self.redeploy(|builder| {
            builder.classes.remove(name);
        })
    }

    /// Number of classes currently deployed.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.snapshot().classes.len()
    }
}

impl Dictionary for InMemoryDictionary {
    fn get_class(&self, name: &QName) -> Option<Arc<ClassDef>> {
        self.snapshot().classes.get(name).cloned()
    }

    fn get_property(&self, name: &QName) -> Option<Arc<PropertyDef>> {
        self.snapshot().properties.get(name).cloned()
    }

    fn get_association(&self, name: &QName) -> Option<Arc<AssociationDef>> {
        self.snapshot().associations.get(name).cloned()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> QName {
        s.parse().expect("qname")
    }

    #[test]
    fn subclass_inherits_defaults_and_archive_flag() {
        let dict = DictionaryBuilder::new()
            .add_aspect(ClassSpec::new(q("t:audited")))
            .add_type(
                ClassSpec::new(q("t:base"))
                    .default_aspect(q("t:audited"))
                    .property(PropertySpec::text(q("t:label")).with_default("none"))
                    .archive(true),
            )
            .add_type(ClassSpec::new(q("t:doc")).parent(q("t:base")))
            .build()
            .expect("build");

        let doc = dict.get_type(&q("t:doc")).expect("type");
        assert_eq!(doc.default_aspects, vec![q("t:audited")]);
        assert_eq!(doc.archive, Some(true));
        assert!(doc.properties.contains_key(&q("t:label")));
        assert!(dict.is_subclass(&q("t:doc"), &q("t:base")));
        assert!(!dict.is_subclass(&q("t:base"), &q("t:doc")));
    }

    #[test]
    fn bool_defaults_are_converted_case_insensitively() {
        let dict = DictionaryBuilder::new()
            .add_aspect(
                ClassSpec::new(q("t:flagged"))
                    .property(PropertySpec::of_type(q("t:flag"), DataType::Bool).with_default("True")),
            )
            .build()
            .expect("build");
        let prop = dict.get_property(&q("t:flag")).expect("property");
        assert_eq!(prop.default, Some(PropertyValue::Bool(true)));
        assert_eq!(prop.owner, q("t:flagged"));
    }

    #[test]
    fn invalid_long_default_is_rejected() {
        let result = DictionaryBuilder::new()
            .add_aspect(
                ClassSpec::new(q("t:counted"))
                    .property(PropertySpec::of_type(q("t:count"), DataType::Long).with_default("many")),
            )
            .build();
        assert!(matches!(result, Err(ArborError::InvalidArgument(_))));
    }

    #[test]
    fn cyclic_class_hierarchy_is_rejected() {
        let result = DictionaryBuilder::new()
            .add_type(ClassSpec::new(q("t:a")).parent(q("t:b")))
            .add_type(ClassSpec::new(q("t:b")).parent(q("t:a")))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn undeploy_removes_class_and_its_properties() {
        let dict = DictionaryBuilder::new()
            .add_aspect(ClassSpec::new(q("t:tagged")).property(PropertySpec::text(q("t:tag"))))
            .build()
            .expect("build");
        assert!(dict.get_aspect(&q("t:tagged")).is_some());

        dict.undeploy_class(&q("t:tagged")).expect("undeploy");
        assert!(dict.get_aspect(&q("t:tagged")).is_none());
        assert!(dict.get_property(&q("t:tag")).is_none());
    }

    #[test]
    fn associations_are_attached_to_their_source_lineage() {
        let dict = DictionaryBuilder::new()
            .add_type(ClassSpec::new(q("t:container")))
            .add_type(ClassSpec::new(q("t:box")).parent(q("t:container")))
            .add_association(AssociationSpec::child(q("t:holds"), q("t:container")))
            .build()
            .expect("build");
        let boxed = dict.get_type(&q("t:box")).expect("type");
        assert_eq!(boxed.associations, vec![q("t:holds")]);
        assert!(dict.get_association(&q("t:holds")).expect("assoc").is_child());
    }
}
