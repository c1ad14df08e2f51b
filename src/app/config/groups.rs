use super::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// One pipeline declared in the agent's TOML file.
///
/// The pipeline body is either inline (`spec`, a JSON string or a TOML
/// table) or read from `spec_file`, resolved against the directory of the
/// file that declared it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineEntry {
    pub project: String,
    pub logstore: String,
    pub name: String,
    #[serde(default)]
    pub key: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_file: Option<PathBuf>,
}

impl PipelineEntry {
    /// Returns the pipeline body as JSON text.
    pub fn load_spec(&self, base_dir: Option<&Path>) -> Result<String, ConfigError> {
        match (&self.spec, &self.spec_file) {
            (Some(Value::String(text)), None) => Ok(text.clone()),
            (Some(inline), None) => Ok(inline.to_string()),
            (None, Some(path)) => {
                let resolved = match base_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path.clone(),
                };
                std::fs::read_to_string(&resolved).map_err(|e| ConfigError::PipelineSpec {
                    name: self.name.clone(),
                    reason: format!("cannot read {}: {e}", resolved.display()),
                })
            }
            (Some(_), Some(_)) => Err(self.spec_error("both spec and spec_file are set")),
            (None, None) => Err(self.spec_error("one of spec or spec_file is required")),
        }
    }

    fn spec_error(&self, reason: &str) -> ConfigError {
        ConfigError::PipelineSpec {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(spec: Option<Value>, spec_file: Option<PathBuf>) -> PipelineEntry {
        PipelineEntry {
            project: "prj".to_string(),
            logstore: "store".to_string(),
            name: "cfg".to_string(),
            key: 1,
            spec,
            spec_file,
        }
    }

    #[test]
    fn test_inline_string_spec_is_passed_through() {
        let text = r#"{"inputs":[]}"#;
        let e = entry(Some(Value::String(text.to_string())), None);
        assert_eq!(e.load_spec(None).unwrap(), text);
    }

    #[test]
    fn test_inline_table_spec_is_serialized() {
        let e = entry(Some(json!({"inputs": [{"type": "metric_container"}]})), None);
        let text = e.load_spec(None).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["inputs"][0]["type"], "metric_container");
    }

    #[test]
    fn test_relative_spec_file_uses_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("p.json"), r#"{"flushers":[]}"#).unwrap();
        let e = entry(None, Some(PathBuf::from("p.json")));
        assert_eq!(e.load_spec(Some(dir.path())).unwrap(), r#"{"flushers":[]}"#);
    }

    #[test]
    fn test_spec_sources_are_exclusive() {
        let both = entry(Some(json!({})), Some(PathBuf::from("x.json")));
        assert!(matches!(
            both.load_spec(None),
            Err(ConfigError::PipelineSpec { .. })
        ));
        assert!(entry(None, None).load_spec(None).is_err());
    }
}
