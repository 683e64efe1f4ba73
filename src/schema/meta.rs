use std::fmt;
use std::sync::Arc;

use crate::keys::{default_pk_creator, KeySpace, PrimaryKeyCreator};

/// Per-model policy bundle: key prefixes, primary-key generation, index
/// naming, embedded flag, and text encoding. Every field is optional at
/// declaration time; unresolved fields fall back to defaults or, through
/// [`Meta::inherit`], to a parent model's meta.
#[derive(Clone)]
pub struct Meta {
    pub global_key_prefix: Option<String>,
    pub model_key_prefix: Option<String>,
    pub primary_key_pattern: Option<String>,
    pub index_name: Option<String>,
    pub embedded: bool,
    pub encoding: Option<String>,
    pub primary_key_creator: Option<Arc<dyn PrimaryKeyCreator>>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            global_key_prefix: None,
            model_key_prefix: None,
            primary_key_pattern: None,
            index_name: None,
            embedded: false,
            encoding: None,
            primary_key_creator: None,
        }
    }
}

impl Meta {
    pub fn global_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.global_key_prefix = Some(prefix.into());
        self
    }

    pub fn model_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.model_key_prefix = Some(prefix.into());
        self
    }

    pub fn primary_key_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.primary_key_pattern = Some(pattern.into());
        self
    }

    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn primary_key_creator(mut self, creator: Arc<dyn PrimaryKeyCreator>) -> Self {
        self.primary_key_creator = Some(creator);
        self
    }

    /// Merge rule for model inheritance: fields present on `self` win,
    /// missing ones are taken from the parent. The embedded flag never
    /// inherits; embedding is a property of the concrete type.
    pub fn inherit(mut self, parent: &Meta) -> Self {
        if self.global_key_prefix.is_none() {
            self.global_key_prefix = parent.global_key_prefix.clone();
        }
        if self.model_key_prefix.is_none() {
            self.model_key_prefix = parent.model_key_prefix.clone();
        }
        if self.primary_key_pattern.is_none() {
            self.primary_key_pattern = parent.primary_key_pattern.clone();
        }
        if self.index_name.is_none() {
            self.index_name = parent.index_name.clone();
        }
        if self.encoding.is_none() {
            self.encoding = parent.encoding.clone();
        }
        if self.primary_key_creator.is_none() {
            self.primary_key_creator = parent.primary_key_creator.clone();
        }
        self
    }

    pub fn resolved_encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or("utf-8")
    }

    /// Build the key space for a model with this meta. The model prefix
    /// defaults to the module-qualified type name handed in by the caller.
    pub fn key_space(&self, default_model_prefix: &str) -> KeySpace {
        KeySpace::new(
            self.global_key_prefix.clone().unwrap_or_default(),
            self.model_key_prefix
                .clone()
                .unwrap_or_else(|| default_model_prefix.to_string()),
            self.primary_key_pattern
                .clone()
                .unwrap_or_else(|| "{pk}".to_string()),
            self.index_name.clone(),
            self.primary_key_creator
                .clone()
                .unwrap_or_else(default_pk_creator),
        )
    }
}

impl fmt::Debug for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meta")
            .field("global_key_prefix", &self.global_key_prefix)
            .field("model_key_prefix", &self.model_key_prefix)
            .field("primary_key_pattern", &self.primary_key_pattern)
            .field("index_name", &self.index_name)
            .field("embedded", &self.embedded)
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl PartialEq for Meta {
    fn eq(&self, other: &Self) -> bool {
        self.global_key_prefix == other.global_key_prefix
            && self.model_key_prefix == other.model_key_prefix
            && self.primary_key_pattern == other.primary_key_pattern
            && self.index_name == other.index_name
            && self.embedded == other.embedded
            && self.encoding == other.encoding
    }
}
