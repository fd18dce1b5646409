//! # Schema Registry
//!
//! Declares, per flavour, the block role, which parents and children are
//! allowed, and a factory for default properties.
//!
//! Relationship lists accept exact flavours or namespace globs such as
//! `"folio:*"`. A missing list means "anything goes".

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::props::Props;

/// Role a flavour plays in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockRole {
    /// Document root: at most one per document, never has a parent
    Root,
    Content,
}

/// Produces the default properties of a new block
pub type PropsFactory = Arc<dyn Fn() -> Props + Send + Sync>;

/// Schema for a single flavour
#[derive(Clone)]
pub struct FlavourSchema {
    pub flavour: String,
    pub role: BlockRole,
    /// Flavours this block may be placed under (`None` = any)
    pub parents: Option<Vec<String>>,
    /// Flavours this block accepts as children (`None` = any)
    pub children: Option<Vec<String>>,
    props: PropsFactory,
}

impl FlavourSchema {
    pub fn new(flavour: impl Into<String>, role: BlockRole) -> Self {
        Self {
            flavour: flavour.into(),
            role,
            parents: None,
            children: None,
            props: Arc::new(Props::new),
        }
    }

    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents = Some(parents.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = Some(children.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_props<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Props + Send + Sync + 'static,
    {
        self.props = Arc::new(factory);
        self
    }

    /// Fresh copy of the default properties
    pub fn default_props(&self) -> Props {
        (self.props)()
    }

    pub fn is_root(&self) -> bool {
        self.role == BlockRole::Root
    }

    fn accepts_parent(&self, parent: &str) -> bool {
        matches_any(self.parents.as_deref(), parent)
    }

    fn accepts_child(&self, child: &str) -> bool {
        matches_any(self.children.as_deref(), child)
    }
}

impl fmt::Debug for FlavourSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlavourSchema")
            .field("flavour", &self.flavour)
            .field("role", &self.role)
            .field("parents", &self.parents)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

fn matches_any(patterns: Option<&[String]>, flavour: &str) -> bool {
    match patterns {
        None => true,
        Some(patterns) => patterns.iter().any(|p| flavour_matches(p, flavour)),
    }
}

/// `"*"` matches everything, `"ns:*"` matches every flavour in `ns`.
fn flavour_matches(pattern: &str, flavour: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => flavour.starts_with(prefix),
        None => pattern == flavour,
    }
}

/// Registry of every known flavour
#[derive(Debug, Clone, Default)]
pub struct Schema {
    flavours: HashMap<String, FlavourSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a flavour
    pub fn register(&mut self, schema: FlavourSchema) -> &mut Self {
        self.flavours.insert(schema.flavour.clone(), schema);
        self
    }

    pub fn with(mut self, schema: FlavourSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, flavour: &str) -> Option<&FlavourSchema> {
        self.flavours.get(flavour)
    }

    pub fn contains(&self, flavour: &str) -> bool {
        self.flavours.contains_key(flavour)
    }

    pub fn flavours(&self) -> impl Iterator<Item = &str> {
        self.flavours.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.flavours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flavours.is_empty()
    }

    /// Validate a flavour against its prospective parent and children.
    ///
    /// `parent` is `None` only for blocks that will be the document root.
    pub fn validate(
        &self,
        flavour: &str,
        parent: Option<&str>,
        children: &[&str],
    ) -> Result<(), ValidationError> {
        if flavour.is_empty() {
            return Err(ValidationError::EmptyFlavour);
        }
        let schema = self
            .get(flavour)
            .ok_or_else(|| ValidationError::UnknownFlavour(flavour.to_string()))?;

        match parent {
            Some(parent) => {
                if schema.is_root() {
                    return Err(ValidationError::RootWithParent(flavour.to_string()));
                }
                self.validate_pair(flavour, parent)?;
            }
            None => {
                if !schema.is_root() {
                    return Err(ValidationError::MissingParent(flavour.to_string()));
                }
            }
        }

        for child in children {
            self.validate_pair(child, flavour)?;
        }

        Ok(())
    }

    /// Check a single child → parent relationship in both directions
    pub fn validate_pair(&self, child: &str, parent: &str) -> Result<(), ValidationError> {
        let child_schema = self
            .get(child)
            .ok_or_else(|| ValidationError::UnknownFlavour(child.to_string()))?;
        let parent_schema = self
            .get(parent)
            .ok_or_else(|| ValidationError::UnknownFlavour(parent.to_string()))?;

        if child_schema.is_root() {
            return Err(ValidationError::RootWithParent(child.to_string()));
        }
        if !child_schema.accepts_parent(parent) {
            return Err(ValidationError::ParentNotAllowed {
                child: child.to_string(),
                parent: parent.to_string(),
            });
        }
        if !parent_schema.accepts_child(child) {
            return Err(ValidationError::ChildNotAllowed {
                child: child.to_string(),
                parent: parent.to_string(),
            });
        }
        Ok(())
    }

    /// Built-in page/note/paragraph schema used by the CLI and tests
    pub fn default_schema() -> Self {
        use crate::props::PropValue;

        Schema::new()
            .with(
                FlavourSchema::new("folio:page", BlockRole::Root)
                    .with_children(["folio:note"])
                    .with_props(|| {
                        let mut props = Props::new();
                        props.insert("title".to_string(), PropValue::text(""));
                        props
                    }),
            )
            .with(
                FlavourSchema::new("folio:note", BlockRole::Content)
                    .with_parents(["folio:page"])
                    .with_children(["folio:paragraph", "folio:list", "folio:divider"]),
            )
            .with(
                FlavourSchema::new("folio:paragraph", BlockRole::Content)
                    .with_parents(["folio:note", "folio:paragraph", "folio:list"])
                    .with_children(["folio:paragraph", "folio:list"])
                    .with_props(|| {
                        let mut props = Props::new();
                        props.insert("type".to_string(), PropValue::from("text"));
                        props.insert("text".to_string(), PropValue::text(""));
                        props
                    }),
            )
            .with(
                FlavourSchema::new("folio:list", BlockRole::Content)
                    .with_parents(["folio:note", "folio:paragraph", "folio:list"])
                    .with_children(["folio:paragraph", "folio:list"])
                    .with_props(|| {
                        let mut props = Props::new();
                        props.insert("type".to_string(), PropValue::from("bulleted"));
                        props.insert("checked".to_string(), PropValue::Bool(false));
                        props.insert("text".to_string(), PropValue::text(""));
                        props
                    }),
            )
            .with(
                FlavourSchema::new("folio:divider", BlockRole::Content)
                    .with_parents(["folio:note"])
                    .with_children(Vec::<String>::new()),
            )
    }
}
