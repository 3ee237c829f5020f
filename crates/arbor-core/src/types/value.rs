use super::{ChildAssocRef, NodeRef};
use serde::{Deserialize, Serialize};

/// A typed property value.
///
/// Integer-only: dates are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    Null,
    Text(String),
    Bool(bool),
    Long(i64),
    Date(i64),
    NodeRef(NodeRef),
    ChildAssocRef(Box<ChildAssocRef>),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Date or long content in milliseconds.
    #[must_use]
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Self::Date(ms) | Self::Long(ms) => Some(*ms),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_node_ref(&self) -> Option<&NodeRef> {
        match self {
            Self::NodeRef(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_child_assoc_ref(&self) -> Option<&ChildAssocRef> {
        match self {
            Self::ChildAssocRef(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<NodeRef> for PropertyValue {
    fn from(value: NodeRef) -> Self {
        Self::NodeRef(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_accessor() {
        let value = PropertyValue::from("hello");
        assert_eq!(value.as_text(), Some("hello"));
        assert_eq!(PropertyValue::Long(3).as_text(), None);
    }

    #[test]
    fn millis_accessor_accepts_dates_and_longs() {
        assert_eq!(PropertyValue::Date(10).as_millis(), Some(10));
        assert_eq!(PropertyValue::Long(11).as_millis(), Some(11));
        assert_eq!(PropertyValue::Null.as_millis(), None);
    }
}
