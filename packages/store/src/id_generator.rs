use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

/// Source of fresh block ids.
///
/// Ids must never repeat within a document, including ids of deleted blocks.
pub trait IdGenerator: Send {
    fn new_id(&mut self) -> String;

    /// Note an id already present in the document, live or deleted
    fn reserve(&mut self, _id: &str) {}
}

/// Which generator a document uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdGeneratorKind {
    /// Random v4 UUIDs, safe across replicas
    #[default]
    Uuid,
    /// `<seed>-<n>` ids, deterministic; meant for tests and single-writer tools
    Sequential,
}

impl IdGeneratorKind {
    pub fn build(self, doc_id: &str) -> Box<dyn IdGenerator> {
        match self {
            IdGeneratorKind::Uuid => Box::new(UuidGenerator),
            IdGeneratorKind::Sequential => Box::new(SequentialIdGenerator::new(doc_id)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&mut self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Generate a short stable seed from a document id using CRC32
pub fn get_document_seed(doc_id: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(doc_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Sequential ID generator for blocks within a document
#[derive(Debug, Clone)]
pub struct SequentialIdGenerator {
    seed: String,
    count: u32,
}

impl SequentialIdGenerator {
    pub fn new(doc_id: &str) -> Self {
        Self {
            seed: get_document_seed(doc_id),
            count: 0,
        }
    }

    pub fn from_seed(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            count: 0,
        }
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn new_id(&mut self) -> String {
        self.count += 1;
        format!("{}-{}", self.seed, self.count)
    }

    /// Continue numbering after any `<seed>-<n>` id seen so far
    fn reserve(&mut self, id: &str) {
        let count = id
            .strip_prefix(self.seed.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(count) = count {
            self.count = self.count.max(count);
        }
    }
}
