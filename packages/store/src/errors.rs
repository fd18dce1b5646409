//! Error types for the document store

use thiserror::Error;

/// Top-level error returned by every mutating [`Doc`](crate::Doc) operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("cannot modify data in read-only mode")]
    Readonly,

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Document is not loaded")]
    NotReady,

    #[error("Document has been disposed")]
    Disposed,

    #[error("Failed to decode: {0}")]
    Decode(String),

    #[error("Failed to apply update: {0}")]
    Apply(String),
}

/// A flavour/parent/child combination rejected by the schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("block props must contain a flavour")]
    EmptyFlavour,

    #[error("flavour {0} is not registered")]
    UnknownFlavour(String),

    #[error("root flavour {0} cannot have a parent")]
    RootWithParent(String),

    #[error("flavour {0} needs a parent but the document has no root")]
    MissingParent(String),

    #[error("flavour {child} is not allowed under {parent}")]
    ParentNotAllowed { child: String, parent: String },

    #[error("{parent} does not accept children of flavour {child}")]
    ChildNotAllowed { child: String, parent: String },
}

/// A tree-shape precondition that does not hold.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructuralError {
    #[error("the blocks to move are not contiguous under their parent")]
    NotContiguous,

    #[error("target sibling {0} not found under the new parent")]
    SiblingNotFound(String),

    #[error("target sibling {0} is itself being moved")]
    InvalidSibling(String),

    #[error("block {0} has no parent")]
    MissingParent(String),

    #[error("moving {0} would place it inside its own subtree")]
    Cycle(String),

    #[error("cannot bring children to another block and delete them at the same time")]
    ConflictingDeleteOptions,

    #[error("block {0} has children but neither deleteChildren nor bringChildrenTo was requested")]
    UnresolvedChildren(String),

    #[error("document already has a root block {0}")]
    DuplicateRoot(String),

    #[error("block id {0} is already in use")]
    DuplicateId(String),
}

/// A lookup that the caller assumed would succeed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotFoundError {
    #[error("block {0}")]
    Block(String),

    #[error("schema for flavour {0}")]
    Flavour(String),
}

impl StoreError {
    pub fn block_not_found(id: impl Into<String>) -> Self {
        Self::NotFound(NotFoundError::Block(id.into()))
    }

    pub fn is_readonly(&self) -> bool {
        matches!(self, Self::Readonly)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = StoreError::from(ValidationError::ParentNotAllowed {
            child: "folio:paragraph".to_string(),
            parent: "folio:page".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Validation error: flavour folio:paragraph is not allowed under folio:page"
        );
        assert!(err.is_validation());

        let err = StoreError::from(StructuralError::NotContiguous);
        assert!(err.is_structural());
        assert!(!err.is_readonly());
    }

    #[test]
    fn test_block_not_found_helper() {
        let err = StoreError::block_not_found("abc");
        assert_eq!(err, StoreError::NotFound(NotFoundError::Block("abc".to_string())));
        assert_eq!(err.to_string(), "Not found: block abc");
    }
}
