//! Aspect and type changes.

use crate::graph::associations::AssocFilter;
use crate::policy::{AfterEvent, BeforeEvent};
use crate::txn::Transaction;
use crate::{ArborError, AssocId, NodeId, NodeRef, PeerAssocId, PropertyMap, QName};
use tracing::{debug, warn};

impl Transaction {
    /// Apply an aspect, with optional initial values for its properties.
    ///
    /// The node also gains every aspect the new one requires, each with its
    /// default values. Adding an aspect the node already has only writes the
    /// given properties.
    pub fn add_aspect(
        &mut self,
        node: &NodeRef,
        aspect: &QName,
        properties: PropertyMap,
    ) -> Result<(), ArborError> {
        self.mutate(|txn| txn.add_aspect_impl(node, aspect, properties))
    }

    fn add_aspect_impl(
        &mut self,
        node: &NodeRef,
        aspect: &QName,
        mut properties: PropertyMap,
    ) -> Result<(), ArborError> {
        if self.dictionary().get_aspect(aspect).is_none() {
            return Err(ArborError::InvalidAspect(aspect.clone()));
        }
        let id = self.resolve_mutable(node)?;
        self.graph.strip_virtual(id, &mut properties)?;
        self.before(BeforeEvent::UpdateNode { node: node.clone() })?;
        self.before(BeforeEvent::AddAspect {
            node: node.clone(),
            aspect: aspect.clone(),
        })?;

        let before = self.graph.require_live(id)?.properties.clone();
        self.graph.set_properties(id, properties, false)?;
        let closure = self.closure_for(id, aspect)?;
        let added = self.apply_closure(id, closure)?;
        self.finish_update(id, before, !added.is_empty())?;
        for added in added {
            self.after(AfterEvent::AddAspect {
                node: node.clone(),
                aspect: added,
            });
        }
        Ok(())
    }

    /// Remove an aspect and the properties it declares.
    ///
    /// Child and peer associations declared by the aspect are removed from
    /// the node's side (children held primarily are deleted). Associations
    /// from other nodes pointing at this one are left alone. If the aspect is
    /// no longer in the dictionary, only its marker and the unknown
    /// properties in its namespace are removed.
    pub fn remove_aspect(&mut self, node: &NodeRef, aspect: &QName) -> Result<(), ArborError> {
        self.mutate(|txn| txn.remove_aspect_impl(node, aspect))
    }

    fn remove_aspect_impl(&mut self, node: &NodeRef, aspect: &QName) -> Result<(), ArborError> {
        let id = self.resolve_mutable(node)?;
        if !self.graph.require_live(id)?.aspects.contains(aspect) {
            return Ok(());
        }
        self.before(BeforeEvent::UpdateNode { node: node.clone() })?;
        self.before(BeforeEvent::RemoveAspect {
            node: node.clone(),
            aspect: aspect.clone(),
        })?;
        let before = self.graph.require_live(id)?.properties.clone();

        let dictionary = self.dictionary();
        match dictionary.get_aspect(aspect) {
            Some(def) => {
                self.graph.remove_properties(id, def.properties.keys())?;
                let declared: Vec<QName> = def
                    .associations
                    .iter()
                    .filter(|name| {
                        dictionary
                            .get_association(name)
                            .is_some_and(|a| &a.source_class == aspect)
                    })
                    .cloned()
                    .collect();
                self.remove_declared_assocs(id, &declared)?;
            }
            None => {
                warn!(node = %node, aspect = %aspect, "removing aspect unknown to the dictionary");
                let orphaned: Vec<QName> = before
                    .keys()
                    .filter(|key| key.prefix() == aspect.prefix())
                    .filter(|key| dictionary.get_property(key).is_none())
                    .cloned()
                    .collect();
                self.graph.remove_properties(id, &orphaned)?;
            }
        }

        self.graph.remove_aspects(id, [aspect])?;
        self.finish_update(id, before, true)?;
        self.after(AfterEvent::RemoveAspect {
            node: node.clone(),
            aspect: aspect.clone(),
        });
        Ok(())
    }

    fn remove_declared_assocs(&mut self, id: NodeId, declared: &[QName]) -> Result<(), ArborError> {
        if declared.is_empty() {
            return Ok(());
        }
        let children: Vec<AssocId> = self
            .graph
            .child_assocs_of(id)
            .filter(|a| declared.contains(&a.assoc_type))
            .filter(|a| !self.ctx.is_pending(a.child))
            .map(|a| a.id)
            .collect();
        let peers: Vec<PeerAssocId> = self
            .graph
            .target_assocs(id, AssocFilter::any())
            .filter(|a| declared.contains(&a.assoc_type))
            .filter(|a| !self.ctx.is_pending(a.target))
            .map(|a| a.id)
            .collect();
        debug!(
            children = children.len(),
            peers = peers.len(),
            "removing associations declared by aspect"
        );
        for assoc in children {
            // An earlier removal in this loop may already have taken it.
            if self.graph.child_assoc(assoc).is_some() {
                self.remove_child_assoc_by_id(assoc)?;
            }
        }
        for assoc in peers {
            if self.graph.peer_assoc(assoc).is_some() {
                self.remove_peer_by_id(assoc)?;
            }
        }
        Ok(())
    }

    /// Change the node's type, adding whatever the new type requires.
    pub fn set_type(&mut self, node: &NodeRef, new_type: &QName) -> Result<(), ArborError> {
        self.mutate(|txn| txn.set_type_impl(node, new_type))
    }

    fn set_type_impl(&mut self, node: &NodeRef, new_type: &QName) -> Result<(), ArborError> {
        if self.dictionary().get_type(new_type).is_none() {
            return Err(ArborError::InvalidType(new_type.clone()));
        }
        let id = self.resolve_mutable(node)?;
        let old_type = self.graph.require_live(id)?.type_qname.clone();
        self.before(BeforeEvent::UpdateNode { node: node.clone() })?;
        self.before(BeforeEvent::SetNodeType {
            node: node.clone(),
            old_type: old_type.clone(),
            new_type: new_type.clone(),
        })?;

        let before = self.graph.require_live(id)?.properties.clone();
        let changed = self.graph.set_type_qname(id, new_type.clone())?;
        let closure = self.closure_for(id, new_type)?;
        let added = self.apply_closure(id, closure)?;
        self.finish_update(id, before, changed || !added.is_empty())?;
        for aspect in added {
            self.after(AfterEvent::AddAspect {
                node: node.clone(),
                aspect,
            });
        }
        if changed {
            self.after(AfterEvent::SetNodeType {
                node: node.clone(),
                old_type,
                new_type: new_type.clone(),
            });
        }
        Ok(())
    }
}
