pub mod docker;
pub mod registry;
pub mod runtime;
pub mod selection;
pub mod watcher;

pub use docker::DockerRuntime;
pub use registry::ContainerRegistry;
pub use runtime::{
    ContainerRecord, ContainerRuntime, ContainerSummary, LogLine, LogStream, RuntimeError,
    parse_env_list,
};
pub use selection::{SelectionError, SelectionKeys, SelectionRule};
pub use watcher::{ContainerWatcher, TickReport};
