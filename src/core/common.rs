//! Metadata and label helpers shared by every API object kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "default";

pub type Labels = BTreeMap<String, String>;

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Unique id of an object. Objects read from the store without uid are treated as
    /// non-existent by lookups that require identity.
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: Labels,
    // in seconds
    #[serde(default)]
    pub creation_timestamp: f64,
}

impl Default for ObjectMeta {
    fn default() -> Self {
        Self {
            name: Default::default(),
            namespace: default_namespace(),
            uid: Default::default(),
            labels: Default::default(),
            creation_timestamp: Default::default(),
        }
    }
}

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: format!("{}/{}", namespace, name),
            ..Default::default()
        }
    }

    /// `namespace/name` form used as a key in caches and waiting maps.
    pub fn namespaced_name(&self) -> String {
        namespaced_name(&self.namespace, &self.name)
    }

    /// Objects from cluster files may come without uid, they get `namespace/name`.
    pub fn ensure_uid(&mut self) {
        if self.uid.is_empty() {
            self.uid = self.namespaced_name();
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

pub fn namespaced_name(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Equality-based selector: every key of `selector` must be present in `labels` with the same
/// value. Empty selector matches everything.
pub fn selector_matches(selector: &Labels, labels: &Labels) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}
