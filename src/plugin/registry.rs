use super::aggregator::DefaultAggregator;
use super::flusher::{CheckerFlusher, HttpFlusher, StdoutFlusher};
use super::input::{DockerStdoutInput, MetricContainerInput};
use super::processor::{AddFieldsProcessor, FilterRegexProcessor};
use super::{Aggregator, Flusher, Input, PluginDecl, PluginError, Processor};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type InputFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn Input>, PluginError> + Send + Sync>;
pub type ProcessorFactory =
    Arc<dyn Fn(&Value) -> Result<Box<dyn Processor>, PluginError> + Send + Sync>;
pub type AggregatorFactory =
    Arc<dyn Fn(&Value) -> Result<Box<dyn Aggregator>, PluginError> + Send + Sync>;
pub type FlusherFactory =
    Arc<dyn Fn(&Value) -> Result<Box<dyn Flusher>, PluginError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Input,
    Processor,
    Aggregator,
    Flusher,
}

/// Name to factory tables, one per plugin kind.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    inputs: HashMap<String, InputFactory>,
    processors: HashMap<String, ProcessorFactory>,
    aggregators: HashMap<String, AggregatorFactory>,
    flushers: HashMap<String, FlusherFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_input(DockerStdoutInput::TYPE, |detail| {
            Ok(Box::new(DockerStdoutInput::from_detail(detail)?) as Box<dyn Input>)
        });
        registry.register_input(MetricContainerInput::TYPE, |detail| {
            Ok(Box::new(MetricContainerInput::from_detail(detail)?) as Box<dyn Input>)
        });

        registry.register_processor(AddFieldsProcessor::TYPE, |detail| {
            Ok(Box::new(AddFieldsProcessor::from_detail(detail)?) as Box<dyn Processor>)
        });
        registry.register_processor(FilterRegexProcessor::TYPE, |detail| {
            Ok(Box::new(FilterRegexProcessor::from_detail(detail)?) as Box<dyn Processor>)
        });

        registry.register_aggregator(DefaultAggregator::TYPE, |detail| {
            Ok(Box::new(DefaultAggregator::from_detail(detail)?) as Box<dyn Aggregator>)
        });

        registry.register_flusher(CheckerFlusher::TYPE, |_| {
            Ok(Box::new(CheckerFlusher::new()) as Box<dyn Flusher>)
        });
        registry.register_flusher(StdoutFlusher::TYPE, |detail| {
            Ok(Box::new(StdoutFlusher::from_detail(detail)?) as Box<dyn Flusher>)
        });
        registry.register_flusher(HttpFlusher::TYPE, |detail| {
            Ok(Box::new(HttpFlusher::from_detail(detail)?) as Box<dyn Flusher>)
        });

        registry
    }

    pub fn register_input<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Input>, PluginError> + Send + Sync + 'static,
    {
        self.inputs.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_processor<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Processor>, PluginError> + Send + Sync + 'static,
    {
        self.processors.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_aggregator<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Aggregator>, PluginError> + Send + Sync + 'static,
    {
        self.aggregators.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_flusher<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Flusher>, PluginError> + Send + Sync + 'static,
    {
        self.flushers.insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, kind: PluginKind, name: &str) -> bool {
        match kind {
            PluginKind::Input => self.inputs.contains_key(name),
            PluginKind::Processor => self.processors.contains_key(name),
            PluginKind::Aggregator => self.aggregators.contains_key(name),
            PluginKind::Flusher => self.flushers.contains_key(name),
        }
    }

    pub fn create_input(&self, decl: &PluginDecl) -> Result<Box<dyn Input>, PluginError> {
        let factory = self
            .inputs
            .get(&decl.type_name)
            .ok_or_else(|| PluginError::UnknownType(decl.type_name.clone()))?;
        factory(&decl.detail)
    }

    pub fn create_processor(&self, decl: &PluginDecl) -> Result<Box<dyn Processor>, PluginError> {
        let factory = self
            .processors
            .get(&decl.type_name)
            .ok_or_else(|| PluginError::UnknownType(decl.type_name.clone()))?;
        factory(&decl.detail)
    }

    pub fn create_aggregator(
        &self,
        decl: &PluginDecl,
    ) -> Result<Box<dyn Aggregator>, PluginError> {
        let factory = self
            .aggregators
            .get(&decl.type_name)
            .ok_or_else(|| PluginError::UnknownType(decl.type_name.clone()))?;
        factory(&decl.detail)
    }

    pub fn create_flusher(&self, decl: &PluginDecl) -> Result<Box<dyn Flusher>, PluginError> {
        let factory = self
            .flushers
            .get(&decl.type_name)
            .ok_or_else(|| PluginError::UnknownType(decl.type_name.clone()))?;
        factory(&decl.detail)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |map: Vec<&String>| {
            let mut names: Vec<String> = map.into_iter().cloned().collect();
            names.sort();
            names
        };
        f.debug_struct("PluginRegistry")
            .field("inputs", &names(self.inputs.keys().collect()))
            .field("processors", &names(self.processors.keys().collect()))
            .field("aggregators", &names(self.aggregators.keys().collect()))
            .field("flushers", &names(self.flushers.keys().collect()))
            .finish()
    }
}
