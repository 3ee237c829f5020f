//! Node creation.

use crate::graph::associations::NewChildAssoc;
use crate::model::qnames::{
    ASPECT_AUDITABLE, PROP_CREATED, PROP_CREATOR, PROP_MODIFIED, PROP_MODIFIER, PROP_NAME,
    PROP_NODE_UUID, is_virtual_property,
};
use crate::policy::{AfterEvent, BeforeEvent, IndexEvent};
use crate::primitives::{DEFAULT_CHILD_INDEX, MAX_UUID_LENGTH};
use crate::txn::Transaction;
use crate::{
    ArborError, AssocId, ChildAssocRef, NodeId, NodeRecord, NodeRef, PropertyMap, PropertyValue,
    QName, TxnId,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Check a caller-supplied UUID.
fn validate_uuid(uuid: &str) -> Result<(), ArborError> {
    if uuid.is_empty() {
        return Err(ArborError::InvalidArgument("node uuid is empty".to_string()));
    }
    if uuid.len() > MAX_UUID_LENGTH {
        return Err(ArborError::InvalidArgument(format!(
            "node uuid '{uuid}' is longer than {MAX_UUID_LENGTH} characters"
        )));
    }
    if uuid.contains('/') {
        return Err(ArborError::InvalidArgument(format!(
            "node uuid '{uuid}' contains '/'"
        )));
    }
    Ok(())
}

impl Transaction {
    /// Create a node under `parent` through a new primary association.
    ///
    /// A `sys:node-uuid` entry in `properties` fixes the new node's UUID;
    /// otherwise a random one is generated. The node gains every aspect its
    /// type requires, with their default values, and auditable nodes are
    /// stamped with the current user and time.
    pub fn create_node(
        &mut self,
        parent: &NodeRef,
        assoc_type: &QName,
        qname: &QName,
        node_type: &QName,
        properties: PropertyMap,
    ) -> Result<ChildAssocRef, ArborError> {
        self.mutate(|txn| txn.create_node_impl(parent, assoc_type, qname, node_type, properties))
    }

    fn create_node_impl(
        &mut self,
        parent: &NodeRef,
        assoc_type: &QName,
        qname: &QName,
        node_type: &QName,
        mut properties: PropertyMap,
    ) -> Result<ChildAssocRef, ArborError> {
        let parent_id = self.resolve_mutable(parent)?;
        let dictionary = self.dictionary();
        if dictionary.get_type(node_type).is_none() {
            return Err(ArborError::InvalidType(node_type.clone()));
        }
        let assoc_def = dictionary
            .get_association(assoc_type)
            .filter(|d| d.is_child())
            .ok_or_else(|| ArborError::InvalidAssociation(assoc_type.clone()))?;

        let parent_row = self.graph.require_live(parent_id)?;
        let (store, acl) = (parent_row.store, parent_row.acl);
        let uuid = match properties.get(&*PROP_NODE_UUID) {
            Some(PropertyValue::Text(uuid)) => {
                validate_uuid(uuid)?;
                uuid.clone()
            }
            Some(other) => {
                return Err(ArborError::InvalidArgument(format!(
                    "{} must be text, got {other:?}",
                    *PROP_NODE_UUID
                )));
            }
            None => uuid::Uuid::new_v4().to_string(),
        };
        if self.graph.uuid_owner(store, &uuid).is_some() {
            return Err(ArborError::NodeExists(NodeRef::new(
                parent.store.clone(),
                uuid,
            )));
        }
        properties.retain(|key, _| !is_virtual_property(key));
        let child_name = properties
            .get(&*PROP_NAME)
            .and_then(PropertyValue::as_text)
            .map_or_else(|| uuid.clone(), str::to_string);
        self.graph
            .check_child_name_free(dictionary.as_ref(), parent_id, assoc_type, &child_name, None)?;

        self.before(BeforeEvent::CreateNode {
            parent: parent.clone(),
            assoc_type: assoc_type.clone(),
            node_type: node_type.clone(),
        })?;

        let id = self.graph.ids().node();
        self.graph.write_node(NodeRecord {
            id,
            store,
            uuid,
            type_qname: node_type.clone(),
            aspects: BTreeSet::new(),
            properties,
            acl,
            txn: TxnId(0),
            deleted: false,
        });
        let closure = self.closure_for(id, node_type)?;
        self.apply_closure(id, closure)?;
        self.stamp_created(id)?;

        let assoc_id = self.graph.new_child_assoc(
            dictionary.as_ref(),
            NewChildAssoc {
                parent: parent_id,
                child: id,
                assoc_type: assoc_type.clone(),
                qname: qname.clone(),
                is_primary: true,
                index: DEFAULT_CHILD_INDEX,
            },
        )?;
        self.ensure_source_aspect(parent_id, &assoc_def.source_class)?;

        let assoc = self.assoc_ref(assoc_id)?;
        let after = self.graph.require_live(id)?.properties.clone();
        debug!(node = %assoc.child, parent = %parent, "created node");
        self.after(AfterEvent::CreateNode {
            assoc: assoc.clone(),
        });
        self.after(AfterEvent::CreateChildAssociation {
            assoc: assoc.clone(),
            is_new_node: true,
        });
        self.after(AfterEvent::UpdateProperties {
            node: assoc.child.clone(),
            before: PropertyMap::new(),
            after,
        });
        self.index(IndexEvent::Create(assoc.clone()));
        self.propagate_timestamps(parent_id, assoc_type)?;
        Ok(assoc)
    }

    /// Fill in the creation stamps of an auditable node, keeping any the
    /// caller supplied.
    pub(crate) fn stamp_created(&mut self, id: NodeId) -> Result<(), ArborError> {
        let row = self.graph.require_live(id)?;
        if !row.aspects.contains(&*ASPECT_AUDITABLE) {
            return Ok(());
        }
        let now = PropertyValue::Date(self.now_ms());
        let user = PropertyValue::Text(self.user().to_string());
        let stamps: PropertyMap = [
            (PROP_CREATED.clone(), now.clone()),
            (PROP_CREATOR.clone(), user.clone()),
            (PROP_MODIFIED.clone(), now),
            (PROP_MODIFIER.clone(), user),
        ]
        .into_iter()
        .filter(|(key, _)| !row.properties.contains_key(key))
        .collect();
        if !stamps.is_empty() {
            self.graph.set_properties(id, stamps, false)?;
        }
        Ok(())
    }

    /// Give `source` the aspect that declares an association it now uses.
    pub(crate) fn ensure_source_aspect(
        &mut self,
        source: NodeId,
        source_class: &QName,
    ) -> Result<(), ArborError> {
        let dictionary = self.dictionary();
        if dictionary.get_aspect(source_class).is_none()
            || self.graph.require_live(source)?.aspects.contains(source_class)
        {
            return Ok(());
        }
        let closure = self.closure_for(source, source_class)?;
        let added = self.apply_closure(source, closure)?;
        let node = self.graph.node_ref(source)?;
        for aspect in added {
            self.after(AfterEvent::AddAspect {
                node: node.clone(),
                aspect,
            });
        }
        Ok(())
    }

    pub(crate) fn assoc_ref(&self, id: AssocId) -> Result<ChildAssocRef, ArborError> {
        let assoc = self
            .graph
            .child_assoc(id)
            .ok_or(ArborError::InvalidChildAssociation(id))?;
        self.graph.child_assoc_ref(assoc)
    }
}
