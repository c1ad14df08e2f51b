use crate::buffer::BatchMeta;
use crate::collector::{ContainerRecord, SelectionRule};
use crate::plugin::PipelineSpec;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    Loaded,
    Running,
    Stopped,
}

/// A loaded pipeline declaration and its compiled container selection rules.
#[derive(Debug, Clone)]
pub struct Config {
    pub project: String,
    pub logstore: String,
    pub name: String,
    pub key: i64,
    pub spec: PipelineSpec,
    rules: Vec<SelectionRule>,
}

impl Config {
    pub(crate) fn new(
        project: String,
        logstore: String,
        name: String,
        key: i64,
        spec: PipelineSpec,
        rules: Vec<SelectionRule>,
    ) -> Self {
        Self {
            project,
            logstore,
            name,
            key,
            spec,
            rules,
        }
    }

    pub fn meta(&self) -> BatchMeta {
        BatchMeta {
            project: self.project.clone(),
            logstore: self.logstore.clone(),
            config_name: self.name.clone(),
            config_key: self.key,
        }
    }

    pub fn rules(&self) -> &[SelectionRule] {
        &self.rules
    }

    pub fn follows_containers(&self) -> bool {
        !self.rules.is_empty()
    }

    /// True when any of the config's rules selects the container.
    pub fn matches_container(&self, container: &ContainerRecord) -> bool {
        self.matches_metadata(&container.env, &container.labels)
    }

    pub fn matches_metadata(
        &self,
        env: &HashMap<String, String>,
        labels: &HashMap<String, String>,
    ) -> bool {
        self.rules.iter().any(|rule| rule.matches(env, labels))
    }

    pub fn references(&self, env_keys: &BTreeSet<String>, label_keys: &BTreeSet<String>) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.references(env_keys, label_keys))
    }
}
