//! The system (`sys`) and content (`cm`) models every repository starts with.

use super::qnames::*;
use super::{AssociationSpec, ClassSpec, DataType, DictionaryBuilder, PropertySpec};

/// Builder pre-loaded with the system and content models.
///
/// Callers add their own types on top and call [`DictionaryBuilder::build`].
#[must_use]
pub fn system_model() -> DictionaryBuilder {
    DictionaryBuilder::new()
        // sys
        .add_aspect(
            ClassSpec::new(ASPECT_REFERENCEABLE.clone())
                .property(PropertySpec::text(PROP_STORE_PROTOCOL.clone()))
                .property(PropertySpec::text(PROP_STORE_IDENTIFIER.clone()))
                .property(PropertySpec::text(PROP_NODE_UUID.clone()))
                .property(PropertySpec::of_type(PROP_NODE_DBID.clone(), DataType::Long)),
        )
        .add_aspect(ClassSpec::new(ASPECT_ROOT.clone()))
        .add_aspect(ClassSpec::new(ASPECT_TEMPORARY.clone()))
        .add_aspect(
            ClassSpec::new(ASPECT_ARCHIVED.clone())
                .property(PropertySpec::text(PROP_ARCHIVED_BY.clone()))
                .property(PropertySpec::of_type(PROP_ARCHIVED_DATE.clone(), DataType::Date))
                .property(PropertySpec::of_type(
                    PROP_ARCHIVED_ORIGINAL_PARENT_ASSOC.clone(),
                    DataType::ChildAssocRef,
                ))
                .property(PropertySpec::of_type(
                    PROP_ARCHIVED_ORIGINAL_OWNER.clone(),
                    DataType::Any,
                )),
        )
        .add_type(ClassSpec::new(TYPE_BASE.clone()).default_aspect(ASPECT_REFERENCEABLE.clone()))
        .add_type(
            ClassSpec::new(TYPE_STORE_ROOT.clone())
                .parent(TYPE_BASE.clone())
                .default_aspect(ASPECT_ROOT.clone()),
        )
        .add_type(
            ClassSpec::new(TYPE_ARCHIVE_USER.clone())
                .parent(TYPE_BASE.clone())
                .archive(false),
        )
        // cm
        .add_aspect(
            ClassSpec::new(ASPECT_AUDITABLE.clone())
                .property(PropertySpec::of_type(PROP_CREATED.clone(), DataType::Date))
                .property(PropertySpec::text(PROP_CREATOR.clone()))
                .property(PropertySpec::of_type(PROP_MODIFIED.clone(), DataType::Date))
                .property(PropertySpec::text(PROP_MODIFIER.clone())),
        )
        .add_aspect(ClassSpec::new(ASPECT_OWNABLE.clone()).property(PropertySpec::text(PROP_OWNER.clone())))
        .add_aspect(
            ClassSpec::new(ASPECT_TITLED.clone())
                .property(PropertySpec::text(PROP_TITLE.clone()))
                .property(PropertySpec::text(PROP_DESCRIPTION.clone())),
        )
        .add_type(
            ClassSpec::new(TYPE_CMOBJECT.clone())
                .parent(TYPE_BASE.clone())
                .default_aspect(ASPECT_AUDITABLE.clone())
                .property(PropertySpec::text(PROP_NAME.clone()))
                .archive(true),
        )
        .add_type(ClassSpec::new(TYPE_FOLDER.clone()).parent(TYPE_CMOBJECT.clone()))
        .add_type(ClassSpec::new(TYPE_CONTENT.clone()).parent(TYPE_CMOBJECT.clone()))
        // associations
        .add_association(
            AssociationSpec::child(ASSOC_CHILDREN.clone(), TYPE_BASE.clone()).duplicate_names(),
        )
        .add_association(
            AssociationSpec::child(ASSOC_CONTAINS.clone(), TYPE_FOLDER.clone()).propagating(),
        )
        .add_association(AssociationSpec::child(
            ASSOC_ARCHIVE_USER_LINK.clone(),
            TYPE_STORE_ROOT.clone(),
        ))
        .add_association(
            AssociationSpec::child(ASSOC_ARCHIVED_LINK.clone(), TYPE_ARCHIVE_USER.clone())
                .duplicate_names(),
        )
}
