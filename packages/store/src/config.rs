use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::history::DEFAULT_CAPTURE_TIMEOUT;
use crate::id_generator::IdGeneratorKind;
use crate::props::{PropValue, Props};
use crate::schema::{BlockRole, FlavourSchema, Schema};

pub const DEFAULT_CONFIG_NAME: &str = "folio.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Per-document settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Name of the top-level map holding the blocks
    #[serde(default = "default_blocks_key")]
    pub blocks_key: String,

    /// Undo-merge window in milliseconds. `0` makes every call its own step.
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    #[serde(default)]
    pub id_generator: IdGeneratorKind,

    /// Initial access mode
    #[serde(default)]
    pub readonly: bool,
}

fn default_blocks_key() -> String {
    "blocks".to_string()
}

fn default_capture_timeout_ms() -> u64 {
    DEFAULT_CAPTURE_TIMEOUT.as_millis() as u64
}

impl StoreConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            blocks_key: default_blocks_key(),
            capture_timeout_ms: default_capture_timeout_ms(),
            id_generator: IdGeneratorKind::default(),
            readonly: false,
        }
    }
}

/// Declaration of one flavour in a config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlavourConfig {
    pub flavour: String,
    #[serde(default = "default_role")]
    pub role: BlockRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
    /// Plain default properties
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, JsonValue>,
    /// Properties created as empty replicated text
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub text_props: Vec<String>,
}

fn default_role() -> BlockRole {
    BlockRole::Content
}

impl FlavourConfig {
    fn to_schema(&self) -> FlavourSchema {
        let mut defaults: Props = self
            .props
            .iter()
            .map(|(name, value)| (name.clone(), PropValue::from(value.clone())))
            .collect();
        for name in &self.text_props {
            defaults.insert(name.clone(), PropValue::text(""));
        }

        let mut schema = FlavourSchema::new(self.flavour.clone(), self.role)
            .with_props(move || defaults.clone());
        if let Some(parents) = &self.parents {
            schema = schema.with_parents(parents.clone());
        }
        if let Some(children) = &self.children {
            schema = schema.with_children(children.clone());
        }
        schema
    }
}

/// Flavour declarations; empty means the built-in schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaConfig {
    pub flavours: Vec<FlavourConfig>,
}

impl SchemaConfig {
    pub fn to_schema(&self) -> Schema {
        if self.flavours.is_empty() {
            return Schema::default_schema();
        }
        let mut schema = Schema::new();
        for flavour in &self.flavours {
            schema.register(flavour.to_schema());
        }
        schema
    }
}

/// Contents of `folio.config.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolioConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
}

impl FolioConfig {
    /// Load config from a directory, falling back to defaults when absent
    pub fn load(cwd: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_path = cwd.as_ref().join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).map_err(|source| {
                ConfigError::Io {
                    path: config_path.clone(),
                    source,
                }
            })?;
            Self::from_json(&content)
        } else {
            Ok(FolioConfig::default())
        }
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Write the config into `cwd`, returning the file path
    pub fn save(&self, cwd: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
        let config_path = cwd.as_ref().join(DEFAULT_CONFIG_NAME);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content).map_err(|source| ConfigError::Io {
            path: config_path.clone(),
            source,
        })?;
        Ok(config_path)
    }
}
