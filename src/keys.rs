use std::fmt;
use std::sync::Arc;

use ulid::Ulid;

/// Allocates primary keys locally, without a server round trip.
///
/// The default implementation hands out ULIDs; anything producing unique
/// strings can be plugged in through a model's meta.
pub trait PrimaryKeyCreator: Send + Sync {
    fn allocate(&self) -> String;
}

/// Default creator: 26-character Crockford-base32 ULIDs, lexicographically
/// sortable by creation time at millisecond resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct UlidCreator;

impl PrimaryKeyCreator for UlidCreator {
    fn allocate(&self) -> String {
        Ulid::new().to_string()
    }
}

pub fn default_pk_creator() -> Arc<dyn PrimaryKeyCreator> {
    Arc::new(UlidCreator)
}

/// Key-shape policy for one model: record keys, scan patterns, the index
/// name, and the fingerprint key all derive from the same prefix pair.
/// Kept separate from value encoding so prefix policy lives in one place.
#[derive(Clone)]
pub struct KeySpace {
    global_prefix: String,
    model_prefix: String,
    pk_pattern: String,
    index_name_override: Option<String>,
    pk_creator: Arc<dyn PrimaryKeyCreator>,
}

impl KeySpace {
    pub fn new(
        global_prefix: impl Into<String>,
        model_prefix: impl Into<String>,
        pk_pattern: impl Into<String>,
        index_name_override: Option<String>,
        pk_creator: Arc<dyn PrimaryKeyCreator>,
    ) -> Self {
        Self {
            global_prefix: global_prefix.into(),
            model_prefix: model_prefix.into(),
            pk_pattern: pk_pattern.into(),
            index_name_override,
            pk_creator,
        }
    }

    /// `{global}:{model}` when a global prefix is set, `{model}` otherwise.
    pub fn prefix(&self) -> String {
        if self.global_prefix.is_empty() {
            self.model_prefix.clone()
        } else {
            format!("{}:{}", self.global_prefix, self.model_prefix)
        }
    }

    /// Storage key for one record.
    pub fn key(&self, pk: &str) -> String {
        format!("{}:{}", self.prefix(), self.pk_pattern.replace("{pk}", pk))
    }

    /// SCAN pattern covering every record of this model.
    pub fn all_keys_pattern(&self) -> String {
        format!("{}:*", self.prefix())
    }

    /// The key-prefix argument handed to FT.CREATE (trailing colon included
    /// so sibling models do not leak into each other's index).
    pub fn index_prefix(&self) -> String {
        format!("{}:", self.prefix())
    }

    pub fn index_name(&self) -> String {
        self.index_name_override
            .clone()
            .unwrap_or_else(|| format!("{}:index", self.prefix()))
    }

    /// Key of the persisted schema fingerprint.
    pub fn schema_hash_key(&self) -> String {
        format!("{}:hash", self.prefix())
    }

    pub fn allocate_pk(&self) -> String {
        self.pk_creator.allocate()
    }
}

impl fmt::Debug for KeySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySpace")
            .field("global_prefix", &self.global_prefix)
            .field("model_prefix", &self.model_prefix)
            .field("pk_pattern", &self.pk_pattern)
            .field("index_name_override", &self.index_name_override)
            .finish()
    }
}
