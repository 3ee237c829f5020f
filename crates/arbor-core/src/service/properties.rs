//! Property writes.

use crate::model::qnames::{
    ASPECT_AUDITABLE, PROP_CREATED, PROP_CREATOR, PROP_MODIFIED, PROP_MODIFIER,
    is_virtual_property,
};
use crate::policy::{AfterEvent, BeforeEvent};
use crate::txn::Transaction;
use crate::{ArborError, NodeRef, PropertyMap, PropertyValue, QName};

impl Transaction {
    pub fn set_property(
        &mut self,
        node: &NodeRef,
        key: &QName,
        value: PropertyValue,
    ) -> Result<(), ArborError> {
        let properties = PropertyMap::from([(key.clone(), value)]);
        self.mutate(|txn| txn.write_properties(node, properties, false))
    }

    /// Merge `properties` into the node's existing values.
    pub fn add_properties(&mut self, node: &NodeRef, properties: PropertyMap) -> Result<(), ArborError> {
        self.mutate(|txn| txn.write_properties(node, properties, false))
    }

    /// Replace the node's properties with `properties`.
    ///
    /// Audit stamps the caller leaves out are kept.
    pub fn set_properties(&mut self, node: &NodeRef, properties: PropertyMap) -> Result<(), ArborError> {
        self.mutate(|txn| txn.write_properties(node, properties, true))
    }

    pub fn remove_property(&mut self, node: &NodeRef, key: &QName) -> Result<(), ArborError> {
        self.mutate(|txn| txn.remove_property_impl(node, key))
    }

    fn remove_property_impl(&mut self, node: &NodeRef, key: &QName) -> Result<(), ArborError> {
        if is_virtual_property(key) {
            return Err(ArborError::InvalidArgument(format!(
                "{key} is derived from the node reference and cannot be removed"
            )));
        }
        let id = self.resolve_mutable(node)?;
        self.before(BeforeEvent::UpdateNode { node: node.clone() })?;
        let before = self.graph.require_live(id)?.properties.clone();
        if self.graph.remove_properties(id, [key])? {
            self.finish_update(id, before, false)?;
        }
        Ok(())
    }

    fn write_properties(
        &mut self,
        node: &NodeRef,
        mut properties: PropertyMap,
        overwrite: bool,
    ) -> Result<(), ArborError> {
        let id = self.resolve_mutable(node)?;
        self.graph.strip_virtual(id, &mut properties)?;
        self.before(BeforeEvent::UpdateNode { node: node.clone() })?;

        let row = self.graph.require_live(id)?;
        let before = row.properties.clone();
        if overwrite && row.aspects.contains(&*ASPECT_AUDITABLE) {
            for key in [&*PROP_CREATED, &*PROP_CREATOR, &*PROP_MODIFIED, &*PROP_MODIFIER] {
                if let Some(value) = before.get(key) {
                    properties.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        let type_qname = row.type_qname.clone();

        self.graph.set_properties(id, properties, overwrite)?;
        // New properties may belong to aspects the node does not carry yet.
        let closure = self.closure_for(id, &type_qname)?;
        let added = self.apply_closure(id, closure)?;
        self.finish_update(id, before, !added.is_empty())?;
        for aspect in added {
            self.after(AfterEvent::AddAspect {
                node: node.clone(),
                aspect,
            });
        }
        Ok(())
    }
}
