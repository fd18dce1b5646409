//! # Mutations
//!
//! Serializable commands mirroring the document store's mutating API.
//!
//! A `Mutation` carries plain data only, so scripts can be stored, replayed
//! by the CLI, or sent to another process. `Doc::apply` executes one with
//! exactly the same validation as the direct method call.
//!
//! ## Semantics
//!
//! ### AddBlock / AddBlocks
//! - All blocks validated before anything is written
//! - Supplied children are detached from their current parent
//! - Without a parent, content blocks go under the root
//!
//! ### MoveBlocks
//! - Each source parent's selection must be contiguous
//! - Groups keep the order in which they first appear in `ids`
//!
//! ### DeleteBlock
//! - Deletes the subtree by default
//! - `bring_children_to` re-parents the children instead

use serde::{Deserialize, Serialize};

use crate::props::{PropValue, Props};

/// A block to create
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewBlock {
    pub flavour: String,

    /// Generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Overrides on top of the flavour's default properties
    #[serde(default)]
    pub props: Props,

    /// Existing blocks to adopt as children
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
}

impl NewBlock {
    pub fn new(flavour: impl Into<String>) -> Self {
        Self {
            flavour: flavour.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.props.extend(props);
        self
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }
}

/// Partial update of an existing block
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlockUpdate {
    /// Properties to write
    #[serde(default)]
    pub props: Props,

    /// Properties to remove
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,

    /// Replacement child list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
}

impl BlockUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn remove(mut self, name: impl Into<String>) -> Self {
        self.remove.push(name.into());
        self
    }

    pub fn children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = Some(children.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty() && self.remove.is_empty() && self.children.is_none()
    }
}

/// What happens to the children of a deleted block.
///
/// When deserialized, `delete_children` defaults to true unless
/// `bring_children_to` is given.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "DeleteOptionsFields")]
pub struct DeleteOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bring_children_to: Option<String>,

    pub delete_children: bool,
}

#[derive(Deserialize)]
struct DeleteOptionsFields {
    #[serde(default)]
    bring_children_to: Option<String>,
    #[serde(default)]
    delete_children: Option<bool>,
}

impl From<DeleteOptionsFields> for DeleteOptions {
    fn from(fields: DeleteOptionsFields) -> Self {
        let delete_children = fields
            .delete_children
            .unwrap_or(fields.bring_children_to.is_none());
        Self {
            bring_children_to: fields.bring_children_to,
            delete_children,
        }
    }
}

impl DeleteOptions {
    /// Move the children under `target` instead of deleting them
    pub fn bring_children_to(target: impl Into<String>) -> Self {
        Self {
            bring_children_to: Some(target.into()),
            delete_children: false,
        }
    }

    /// Delete the block only; fails if it still has children
    pub fn leaf_only() -> Self {
        Self {
            bring_children_to: None,
            delete_children: false,
        }
    }
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            bring_children_to: None,
            delete_children: true,
        }
    }
}

/// Position relative to a sibling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Place {
    Before,
    #[default]
    After,
}

/// Document commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Mutation {
    /// Create one block under `parent` at `index` (default: end)
    AddBlock {
        block: NewBlock,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        index: Option<usize>,
    },

    /// Create several blocks starting at `index`
    AddBlocks {
        blocks: Vec<NewBlock>,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        index: Option<usize>,
    },

    /// Create blocks next to an existing sibling
    AddSiblingBlocks {
        target: String,
        blocks: Vec<NewBlock>,
        #[serde(default)]
        place: Place,
    },

    UpdateBlock {
        id: String,
        update: BlockUpdate,
    },

    /// Relocate blocks under `parent`, relative to `sibling` when given
    MoveBlocks {
        ids: Vec<String>,
        parent: String,
        #[serde(default)]
        sibling: Option<String>,
        #[serde(default = "default_before")]
        before: bool,
    },

    DeleteBlock {
        id: String,
        #[serde(default)]
        options: DeleteOptions,
    },

    Undo,
    Redo,

    /// Close the current undo step
    CaptureSync,
}

fn default_before() -> bool {
    true
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::AddBlock { .. } => "addBlock",
            Mutation::AddBlocks { .. } => "addBlocks",
            Mutation::AddSiblingBlocks { .. } => "addSiblingBlocks",
            Mutation::UpdateBlock { .. } => "updateBlock",
            Mutation::MoveBlocks { .. } => "moveBlocks",
            Mutation::DeleteBlock { .. } => "deleteBlock",
            Mutation::Undo => "undo",
            Mutation::Redo => "redo",
            Mutation::CaptureSync => "captureSync",
        }
    }
}

/// Outcome of [`Mutation`] execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MutationResult {
    /// Ids of the created blocks
    Added(Vec<String>),
    Applied,
    /// Undo or redo with an empty stack, or refused in read-only mode
    Skipped,
}

impl MutationResult {
    pub fn ids(&self) -> &[String] {
        match self {
            MutationResult::Added(ids) => ids,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_serialization() {
        let mutation = Mutation::AddBlock {
            block: NewBlock::new("folio:paragraph").with_prop("text", PropValue::text("hi")),
            parent: Some("note".to_string()),
            index: None,
        };

        let json = serde_json::to_string(&mutation).unwrap();
        let deserialized: Mutation = serde_json::from_str(&json).unwrap();

        assert_eq!(mutation, deserialized);
    }

    #[test]
    fn test_script_defaults() {
        let script = r#"[
            { "MoveBlocks": { "ids": ["a"], "parent": "p" } },
            { "DeleteBlock": { "id": "a" } },
            "Undo"
        ]"#;
        let mutations: Vec<Mutation> = serde_json::from_str(script).unwrap();

        assert_eq!(
            mutations[0],
            Mutation::MoveBlocks {
                ids: vec!["a".to_string()],
                parent: "p".to_string(),
                sibling: None,
                before: true,
            }
        );
        assert_eq!(
            mutations[1],
            Mutation::DeleteBlock {
                id: "a".to_string(),
                options: DeleteOptions::default(),
            }
        );
        assert_eq!(mutations[2], Mutation::Undo);
    }

    #[test]
    fn test_delete_options() {
        assert!(DeleteOptions::default().delete_children);
        let opts = DeleteOptions::bring_children_to("root");
        assert!(!opts.delete_children);
        assert_eq!(opts.bring_children_to.as_deref(), Some("root"));
    }

    #[test]
    fn test_delete_options_from_json() {
        let parse = |json: &str| serde_json::from_str::<DeleteOptions>(json).unwrap();

        assert_eq!(parse("{}"), DeleteOptions::default());
        assert_eq!(
            parse(r#"{ "bring_children_to": "n2" }"#),
            DeleteOptions::bring_children_to("n2")
        );
        assert_eq!(parse(r#"{ "delete_children": false }"#), DeleteOptions::leaf_only());

        let conflicting = parse(r#"{ "bring_children_to": "n2", "delete_children": true }"#);
        assert!(conflicting.delete_children);
    }

    #[test]
    fn test_block_update_builder() {
        let update = BlockUpdate::new().set("type", "h1").remove("checked");
        assert!(!update.is_empty());
        assert!(update.children.is_none());
        assert!(BlockUpdate::new().is_empty());
    }
}
