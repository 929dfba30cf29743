// layerline-core/src/infrastructure/config/project.rs

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::domain::job::LayerSchemas;
use crate::infrastructure::error::InfrastructureError;

const CONFIG_CANDIDATES: [&str; 2] = ["layerline.yaml", "layerline_project.yaml"];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,

    /// DuckDB file, relative to the project directory, or `:memory:`.
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(rename = "job-paths", default = "default_job_paths")]
    pub job_paths: Vec<String>,

    #[serde(rename = "target-path", default = "default_target_path")]
    pub target_path: String,

    #[serde(default)]
    pub layers: LayersConfig,

    #[serde(default)]
    pub audit: AuditSinkConfig,

    /// Default reject ratio for jobs that set none.
    #[serde(rename = "reject-threshold", default)]
    pub reject_threshold: Option<f64>,

    /// Jobs run at once by `run` when several are requested.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LayersConfig {
    #[serde(default)]
    pub raw: LayerConfig,
    #[serde(default)]
    pub curated: LayerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LayerConfig {
    pub schema: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    #[default]
    Tracing,
    Jsonl,
    None,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AuditSinkConfig {
    #[serde(default)]
    pub sink: AuditSinkKind,
    /// File for the `jsonl` sink, relative to the target path.
    pub path: Option<String>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}
fn default_database() -> String {
    "target/layerline.duckdb".to_string()
}
fn default_job_paths() -> Vec<String> {
    vec!["jobs".to_string()]
}
fn default_target_path() -> String {
    "target".to_string()
}
fn default_concurrency() -> usize {
    4
}

impl ProjectConfig {
    pub fn layer_schemas(&self) -> LayerSchemas {
        let defaults = LayerSchemas::default();
        LayerSchemas {
            raw: self.layers.raw.schema.clone().unwrap_or(defaults.raw),
            curated: self.layers.curated.schema.clone().unwrap_or(defaults.curated),
        }
    }

    pub fn database_path(&self, project_dir: &Path) -> String {
        if self.database == ":memory:" || Path::new(&self.database).is_absolute() {
            self.database.clone()
        } else {
            project_dir.join(&self.database).to_string_lossy().into_owned()
        }
    }

    pub fn target_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.target_path)
    }

    pub fn audit_log_path(&self, project_dir: &Path) -> PathBuf {
        self.target_dir(project_dir)
            .join(self.audit.path.as_deref().unwrap_or("audit.jsonl"))
    }

    fn validate(&self) -> Result<(), InfrastructureError> {
        if let Some(t) = self.reject_threshold
            && !(0.0..=1.0).contains(&t)
        {
            return Err(InfrastructureError::ConfigError(format!(
                "reject-threshold must be within [0, 1], got {}",
                t
            )));
        }
        if self.concurrency == 0 {
            return Err(InfrastructureError::ConfigError(
                "concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[instrument(skip(project_dir))]
pub fn load_project_config(project_dir: &Path) -> Result<ProjectConfig, InfrastructureError> {
    let config_path = find_main_config(project_dir)?;
    info!(path = ?config_path, "Loading project configuration");

    let content = fs::read_to_string(&config_path)?;
    let mut config: ProjectConfig = serde_yaml::from_str(&content)?;

    // LAYERLINE_DATABASE=:memory: layerline run ...
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;

    Ok(config)
}

fn find_main_config(root: &Path) -> Result<PathBuf, InfrastructureError> {
    for filename in CONFIG_CANDIDATES {
        let p = root.join(filename);
        if p.exists() {
            return Ok(p);
        }
    }
    Err(InfrastructureError::ConfigNotFound(format!(
        "{} (checked {:?})",
        root.display(),
        CONFIG_CANDIDATES
    )))
}

fn apply_env_overrides(
    config: &mut ProjectConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), InfrastructureError> {
    if let Some(val) = lookup("LAYERLINE_DATABASE") {
        info!(old = ?config.database, new = ?val, "Overriding database via ENV");
        config.database = val;
    }
    if let Some(val) = lookup("LAYERLINE_TARGET_PATH") {
        info!(old = ?config.target_path, new = ?val, "Overriding target path via ENV");
        config.target_path = val;
    }
    if let Some(val) = lookup("LAYERLINE_REJECT_THRESHOLD") {
        let threshold = val.trim().parse::<f64>().map_err(|_| {
            InfrastructureError::ConfigError(format!(
                "LAYERLINE_REJECT_THRESHOLD is not a number: '{}'",
                val
            ))
        })?;
        info!(old = ?config.reject_threshold, new = threshold, "Overriding reject threshold via ENV");
        config.reject_threshold = Some(threshold);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const MINIMAL: &str = "name: hr\n";

    #[test]
    fn test_defaults() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("layerline.yaml"), MINIMAL)?;
        let config = load_project_config(dir.path())?;

        assert_eq!(config.job_paths, vec!["jobs"]);
        assert_eq!(config.audit.sink, AuditSinkKind::Tracing);
        assert_eq!(config.layer_schemas(), LayerSchemas::default());
        assert!(config.reject_threshold.is_none());
        assert!(config.database_path(dir.path()).ends_with("layerline.duckdb"));
        Ok(())
    }

    #[test]
    fn test_full_file() -> Result<()> {
        let yaml = r#"
name: hr
version: "2.0"
database: ":memory:"
job-paths: ["jobs", "more_jobs"]
layers:
  raw: { schema: stg }
  curated: { schema: cur }
audit:
  sink: jsonl
  path: logs/audit.jsonl
reject-threshold: 0.2
"#;
        let dir = tempdir()?;
        fs::write(dir.path().join("layerline_project.yaml"), yaml)?;
        let config = load_project_config(dir.path())?;

        assert_eq!(config.database_path(dir.path()), ":memory:");
        assert_eq!(config.layer_schemas().raw, "stg");
        assert_eq!(config.layer_schemas().curated, "cur");
        assert_eq!(config.audit.sink, AuditSinkKind::Jsonl);
        assert!(config.audit_log_path(dir.path()).ends_with("target/logs/audit.jsonl"));
        assert_eq!(config.reject_threshold, Some(0.2));
        Ok(())
    }

    #[test]
    fn test_missing_config() {
        let dir = tempdir().unwrap();
        let result = load_project_config(dir.path());
        assert!(matches!(result, Err(InfrastructureError::ConfigNotFound(_))));
    }

    #[test]
    fn test_env_overrides() -> Result<()> {
        let mut config: ProjectConfig = serde_yaml::from_str(MINIMAL)?;
        let env: HashMap<&str, &str> = [
            ("LAYERLINE_DATABASE", ":memory:"),
            ("LAYERLINE_TARGET_PATH", "/tmp/out"),
            ("LAYERLINE_REJECT_THRESHOLD", "0.05"),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()))?;
        assert_eq!(config.database, ":memory:");
        assert_eq!(config.target_path, "/tmp/out");
        assert_eq!(config.reject_threshold, Some(0.05));

        let bad = apply_env_overrides(&mut config, |k| {
            (k == "LAYERLINE_REJECT_THRESHOLD").then(|| "lots".to_string())
        });
        assert!(matches!(bad, Err(InfrastructureError::ConfigError(_))));
        Ok(())
    }

    #[test]
    fn test_threshold_out_of_range() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("layerline.yaml"), "name: hr\nreject-threshold: 1.5\n")?;
        assert!(matches!(
            load_project_config(dir.path()),
            Err(InfrastructureError::ConfigError(_))
        ));
        Ok(())
    }
}
