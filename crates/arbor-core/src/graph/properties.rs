//! # Property & Aspect Store
//!
//! Per-node property maps and aspect sets with change detection. Writers
//! report whether anything changed; firing notifications for a change is the
//! caller's job.
//!
//! The referenceable properties (`sys:store-protocol`, `sys:store-identifier`,
//! `sys:node-uuid`, `sys:node-dbid`) are never stored. Reads synthesize them
//! from identity and writes drop them.

use super::{GraphState, WorkingGraph};
use crate::model::qnames::{
    PROP_NODE_DBID, PROP_NODE_UUID, PROP_STORE_IDENTIFIER, PROP_STORE_PROTOCOL,
    is_virtual_property,
};
use crate::{ArborError, NodeId, PropertyMap, PropertyValue, QName};
use std::collections::BTreeSet;

impl GraphState {
    /// Stored properties plus the synthesized referenceable properties.
    pub fn get_properties(&self, id: NodeId) -> Result<PropertyMap, ArborError> {
        let node = self.require_live(id)?;
        let mut properties = node.properties.clone();
        let node_ref = self.node_ref(id)?;
        properties.insert(
            PROP_STORE_PROTOCOL.clone(),
            PropertyValue::Text(node_ref.store.protocol),
        );
        properties.insert(
            PROP_STORE_IDENTIFIER.clone(),
            PropertyValue::Text(node_ref.store.identifier),
        );
        properties.insert(PROP_NODE_UUID.clone(), PropertyValue::Text(node_ref.uuid));
        properties.insert(
            PROP_NODE_DBID.clone(),
            PropertyValue::Long(i64::try_from(id.0).unwrap_or(i64::MAX)),
        );
        Ok(properties)
    }

    /// One property, synthesized if virtual.
    pub fn get_property(&self, id: NodeId, key: &QName) -> Result<Option<PropertyValue>, ArborError> {
        if is_virtual_property(key) {
            return Ok(self.get_properties(id)?.remove(key));
        }
        Ok(self.require_live(id)?.properties.get(key).cloned())
    }

    /// The stored aspect set.
    pub fn get_aspects(&self, id: NodeId) -> Result<&BTreeSet<QName>, ArborError> {
        Ok(&self.require_live(id)?.aspects)
    }

    pub fn has_aspect(&self, id: NodeId, aspect: &QName) -> Result<bool, ArborError> {
        Ok(self.require_live(id)?.aspects.contains(aspect))
    }
}

impl WorkingGraph {
    /// Drop virtual keys from a caller-supplied map.
    ///
    /// A `sys:node-uuid` equal to the node's UUID is ignored; any other value
    /// is rejected because identity cannot change through a property write.
    pub fn strip_virtual(&self, id: NodeId, properties: &mut PropertyMap) -> Result<(), ArborError> {
        if let Some(value) = properties.get(&*PROP_NODE_UUID) {
            let node = self.require_live(id)?;
            if value.as_text() != Some(node.uuid.as_str()) {
                return Err(ArborError::InvalidArgument(format!(
                    "{} cannot be changed on {}",
                    *PROP_NODE_UUID,
                    self.node_ref(id)?
                )));
            }
        }
        properties.retain(|key, _| !is_virtual_property(key));
        Ok(())
    }

    /// Write properties.
    ///
    /// With `overwrite` the given map becomes the node's full property set;
    /// without it the given keys are upserted and every other key is kept.
    pub fn set_properties(
        &mut self,
        id: NodeId,
        mut properties: PropertyMap,
        overwrite: bool,
    ) -> Result<bool, ArborError> {
        self.strip_virtual(id, &mut properties)?;
        let mut node = self.require_live(id)?.clone();
        let before = node.properties.clone();
        if overwrite {
            node.properties = properties;
        } else {
            node.properties.extend(properties);
        }
        let changed = node.properties != before;
        if changed {
            self.write_node(node);
        }
        Ok(changed)
    }

    /// Remove properties by key.
    pub fn remove_properties<'a>(
        &mut self,
        id: NodeId,
        keys: impl IntoIterator<Item = &'a QName>,
    ) -> Result<bool, ArborError> {
        let mut node = self.require_live(id)?.clone();
        let mut changed = false;
        for key in keys {
            changed |= node.properties.remove(key).is_some();
        }
        if changed {
            self.write_node(node);
        }
        Ok(changed)
    }

    pub fn add_aspects<'a>(
        &mut self,
        id: NodeId,
        aspects: impl IntoIterator<Item = &'a QName>,
    ) -> Result<bool, ArborError> {
        let mut node = self.require_live(id)?.clone();
        let mut changed = false;
        for aspect in aspects {
            changed |= node.aspects.insert(aspect.clone());
        }
        if changed {
            self.write_node(node);
        }
        Ok(changed)
    }

    pub fn remove_aspects<'a>(
        &mut self,
        id: NodeId,
        aspects: impl IntoIterator<Item = &'a QName>,
    ) -> Result<bool, ArborError> {
        let mut node = self.require_live(id)?.clone();
        let mut changed = false;
        for aspect in aspects {
            changed |= node.aspects.remove(aspect);
        }
        if changed {
            self.write_node(node);
        }
        Ok(changed)
    }

    /// Change the node's type.
    pub fn set_type_qname(&mut self, id: NodeId, type_qname: QName) -> Result<bool, ArborError> {
        let mut node = self.require_live(id)?.clone();
        if node.type_qname == type_qname {
            return Ok(false);
        }
        node.type_qname = type_qname;
        self.write_node(node);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Counters, IdAllocator};
    use crate::{NodeRecord, StoreId, StoreRecord, StoreRef, TxnId};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn working() -> WorkingGraph {
        let mut state = GraphState::new();
        state.put_store(
            StoreId(1),
            Some(StoreRecord {
                id: StoreId(1),
                store_ref: StoreRef::new("workspace", "test"),
                root: NodeId(1),
            }),
        );
        state.put_node(
            NodeId(1),
            Some(NodeRecord {
                id: NodeId(1),
                store: StoreId(1),
                uuid: "root".to_string(),
                type_qname: QName::new("sys", "store_root"),
                aspects: BTreeSet::new(),
                properties: BTreeMap::new(),
                acl: None,
                txn: TxnId(1),
                deleted: false,
            }),
        );
        WorkingGraph::new(Arc::new(state), Arc::new(IdAllocator::new(Counters::default())))
    }

    fn name() -> QName {
        QName::new("cm", "name")
    }

    #[test]
    fn reads_synthesize_virtual_properties() {
        let graph = working();
        let props = graph.get_properties(NodeId(1)).expect("props");
        assert_eq!(
            props.get(&*PROP_NODE_UUID),
            Some(&PropertyValue::Text("root".to_string()))
        );
        assert_eq!(props.get(&*PROP_NODE_DBID), Some(&PropertyValue::Long(1)));
        assert!(graph.node_row(NodeId(1)).expect("row").properties.is_empty());
    }

    #[test]
    fn changing_node_uuid_is_rejected() {
        let mut graph = working();
        let mut props = PropertyMap::new();
        props.insert(PROP_NODE_UUID.clone(), PropertyValue::from("other"));
        let result = graph.set_properties(NodeId(1), props, false);
        assert!(matches!(result, Err(ArborError::InvalidArgument(_))));
    }

    #[test]
    fn same_node_uuid_is_ignored() {
        let mut graph = working();
        let mut props = PropertyMap::new();
        props.insert(PROP_NODE_UUID.clone(), PropertyValue::from("root"));
        props.insert(name(), PropertyValue::from("x"));
        assert!(graph.set_properties(NodeId(1), props, false).expect("set"));
        let row = graph.node_row(NodeId(1)).expect("row");
        assert!(!row.properties.contains_key(&*PROP_NODE_UUID));
        assert!(row.properties.contains_key(&name()));
    }

    #[test]
    fn change_detection_on_properties_and_aspects() {
        let mut graph = working();
        let mut props = PropertyMap::new();
        props.insert(name(), PropertyValue::from("a"));
        assert!(graph.set_properties(NodeId(1), props.clone(), true).expect("set"));
        assert!(!graph.set_properties(NodeId(1), props, true).expect("set again"));

        let titled = QName::new("cm", "titled");
        assert!(graph.add_aspects(NodeId(1), [&titled]).expect("add"));
        assert!(!graph.add_aspects(NodeId(1), [&titled]).expect("add again"));
        assert!(graph.remove_aspects(NodeId(1), [&titled]).expect("remove"));
        assert!(!graph.remove_aspects(NodeId(1), [&titled]).expect("remove again"));
    }

    #[test]
    fn overwrite_replaces_the_full_set() {
        let mut graph = working();
        let title = QName::new("cm", "title");
        let mut first = PropertyMap::new();
        first.insert(name(), PropertyValue::from("a"));
        first.insert(title.clone(), PropertyValue::from("t"));
        graph.set_properties(NodeId(1), first, true).expect("set");

        let mut second = PropertyMap::new();
        second.insert(name(), PropertyValue::from("b"));
        graph.set_properties(NodeId(1), second, true).expect("overwrite");
        let row = graph.node_row(NodeId(1)).expect("row");
        assert!(!row.properties.contains_key(&title));
    }
}
