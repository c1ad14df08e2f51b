use super::{Config, ConfigError};
use std::collections::HashSet;
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Watch interval must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Shutdown timeout must be greater than 0".to_string(),
            ));
        }

        // Remote daemons are given as URLs, local ones as socket paths
        if let Some(socket) = &self.docker_socket
            && socket.contains("://")
        {
            Url::parse(socket).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid docker socket URL '{socket}': {e}"))
            })?;
        }

        let mut names = HashSet::new();
        for pipeline in &self.pipelines {
            if pipeline.name.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "Pipeline name must not be empty".to_string(),
                ));
            }
            if pipeline.project.is_empty() || pipeline.logstore.is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "Pipeline '{}' needs both project and logstore",
                    pipeline.name
                )));
            }
            if !names.insert(pipeline.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Pipeline '{}' is declared more than once",
                    pipeline.name
                )));
            }
            if pipeline.spec.is_some() == pipeline.spec_file.is_some() {
                return Err(ConfigError::PipelineSpec {
                    name: pipeline.name.clone(),
                    reason: "exactly one of spec or spec_file is required".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::PipelineEntry;
    use serde_json::json;

    fn pipeline(name: &str) -> PipelineEntry {
        PipelineEntry {
            project: "prj".to_string(),
            logstore: "store".to_string(),
            name: name.to_string(),
            key: 0,
            spec: Some(json!({})),
            spec_file: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let config = Config {
            watch_interval_ms: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        let config = Config {
            shutdown_timeout_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_docker_url_is_rejected() {
        let config = Config {
            docker_socket: Some("http://[::1".to_string()),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));

        let config = Config {
            docker_socket: Some("/var/run/docker.sock".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_pipeline_names_are_rejected() {
        let config = Config {
            pipelines: vec![pipeline("a"), pipeline("a")],
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            pipelines: vec![pipeline("a"), pipeline("b")],
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
