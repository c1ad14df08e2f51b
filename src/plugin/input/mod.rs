mod docker_stdout;
mod metric_container;

pub use docker_stdout::DockerStdoutInput;
pub use metric_container::MetricContainerInput;
