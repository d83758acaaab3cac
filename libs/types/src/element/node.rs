//! Node contents

/// Contents of a container node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeContents {
    pub identifier: Option<String>,
    pub description: Option<String>,
    pub is_root: Option<bool>,
    pub is_online: Option<bool>,
    pub schema_identifiers: Option<String>,
}

impl NodeContents {
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            ..Default::default()
        }
    }

    /// Overwrite the fields `other` carries, reporting whether anything changed
    pub fn merge(&mut self, other: &NodeContents) -> bool {
        merge_option_fields!(
            self,
            other,
            identifier,
            description,
            is_root,
            is_online,
            schema_identifiers,
        )
    }
}
