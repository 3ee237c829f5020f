//! Well-known names of the system (`sys`) and content (`cm`) models.

use crate::QName;
use std::sync::LazyLock;

pub const SYSTEM_PREFIX: &str = "sys";
pub const CONTENT_PREFIX: &str = "cm";

fn sys(local: &str) -> QName {
    QName::new(SYSTEM_PREFIX, local)
}

fn cm(local: &str) -> QName {
    QName::new(CONTENT_PREFIX, local)
}

// Types
pub static TYPE_BASE: LazyLock<QName> = LazyLock::new(|| sys("base"));
pub static TYPE_STORE_ROOT: LazyLock<QName> = LazyLock::new(|| sys("store_root"));
pub static TYPE_ARCHIVE_USER: LazyLock<QName> = LazyLock::new(|| sys("archiveUser"));
pub static TYPE_CMOBJECT: LazyLock<QName> = LazyLock::new(|| cm("cmobject"));
pub static TYPE_FOLDER: LazyLock<QName> = LazyLock::new(|| cm("folder"));
pub static TYPE_CONTENT: LazyLock<QName> = LazyLock::new(|| cm("content"));

// Aspects
pub static ASPECT_REFERENCEABLE: LazyLock<QName> = LazyLock::new(|| sys("referenceable"));
pub static ASPECT_ROOT: LazyLock<QName> = LazyLock::new(|| sys("root"));
pub static ASPECT_ARCHIVED: LazyLock<QName> = LazyLock::new(|| sys("archived"));
pub static ASPECT_TEMPORARY: LazyLock<QName> = LazyLock::new(|| sys("temporary"));
pub static ASPECT_AUDITABLE: LazyLock<QName> = LazyLock::new(|| cm("auditable"));
pub static ASPECT_OWNABLE: LazyLock<QName> = LazyLock::new(|| cm("ownable"));
pub static ASPECT_TITLED: LazyLock<QName> = LazyLock::new(|| cm("titled"));

// Virtual referenceable properties
pub static PROP_STORE_PROTOCOL: LazyLock<QName> = LazyLock::new(|| sys("store-protocol"));
pub static PROP_STORE_IDENTIFIER: LazyLock<QName> = LazyLock::new(|| sys("store-identifier"));
pub static PROP_NODE_UUID: LazyLock<QName> = LazyLock::new(|| sys("node-uuid"));
pub static PROP_NODE_DBID: LazyLock<QName> = LazyLock::new(|| sys("node-dbid"));

// Archive bookkeeping
pub static PROP_ARCHIVED_BY: LazyLock<QName> = LazyLock::new(|| sys("archivedBy"));
pub static PROP_ARCHIVED_DATE: LazyLock<QName> = LazyLock::new(|| sys("archivedDate"));
pub static PROP_ARCHIVED_ORIGINAL_PARENT_ASSOC: LazyLock<QName> =
    LazyLock::new(|| sys("archivedOriginalParentAssoc"));
pub static PROP_ARCHIVED_ORIGINAL_OWNER: LazyLock<QName> =
    LazyLock::new(|| sys("archivedOriginalOwner"));

// Content properties
pub static PROP_NAME: LazyLock<QName> = LazyLock::new(|| cm("name"));
pub static PROP_TITLE: LazyLock<QName> = LazyLock::new(|| cm("title"));
pub static PROP_DESCRIPTION: LazyLock<QName> = LazyLock::new(|| cm("description"));
pub static PROP_OWNER: LazyLock<QName> = LazyLock::new(|| cm("owner"));
pub static PROP_CREATED: LazyLock<QName> = LazyLock::new(|| cm("created"));
pub static PROP_CREATOR: LazyLock<QName> = LazyLock::new(|| cm("creator"));
pub static PROP_MODIFIED: LazyLock<QName> = LazyLock::new(|| cm("modified"));
pub static PROP_MODIFIER: LazyLock<QName> = LazyLock::new(|| cm("modifier"));

// Associations
pub static ASSOC_CHILDREN: LazyLock<QName> = LazyLock::new(|| sys("children"));
pub static ASSOC_CONTAINS: LazyLock<QName> = LazyLock::new(|| cm("contains"));
pub static ASSOC_ARCHIVE_USER_LINK: LazyLock<QName> = LazyLock::new(|| sys("archiveUserLink"));
pub static ASSOC_ARCHIVED_LINK: LazyLock<QName> = LazyLock::new(|| sys("archivedLink"));

// Association names
pub static QNAME_ARCHIVED_ITEM: LazyLock<QName> = LazyLock::new(|| sys("archivedItem"));

/// Whether the property is synthesised from node identity rather than stored.
#[must_use]
pub fn is_virtual_property(name: &QName) -> bool {
    name == &*PROP_STORE_PROTOCOL
        || name == &*PROP_STORE_IDENTIFIER
        || name == &*PROP_NODE_UUID
        || name == &*PROP_NODE_DBID
}
