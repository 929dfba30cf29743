// layerline-core/src/infrastructure/config/jobs.rs
//
// Job files: `jobs:` lists under the project's job paths. Structural rules
// are validator derives; cross-field rules live on `MappingSet`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, instrument};
use validator::Validate;
use walkdir::WalkDir;

use crate::domain::error::DomainError;
use crate::domain::job::{JobDefinition, LoadType, ScdType, SourceSpec};
use crate::domain::mapping::{ColumnMapping, DataType, MappingSet};
use crate::error::EtlError;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, Default)]
pub struct JobFile {
    #[validate(nested)]
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct JobConfig {
    #[validate(length(min = 1, message = "job name cannot be empty"))]
    pub name: String,

    pub source: SourceSpec,

    #[validate(length(min = 1, message = "target schema cannot be empty"))]
    pub target_schema: String,

    #[validate(length(min = 1, message = "target table cannot be empty"))]
    pub target_table: String,

    #[serde(default)]
    pub load_type: LoadType,

    #[serde(default)]
    pub scd_type: ScdType,

    #[validate(range(min = 0.0, max = 1.0, message = "reject threshold is a ratio in [0, 1]"))]
    #[serde(default)]
    pub reject_threshold: Option<f64>,

    #[validate(nested)]
    #[validate(length(min = 1, message = "a job needs at least one column"))]
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ColumnConfig {
    #[validate(length(min = 1, message = "source column cannot be empty"))]
    pub source: String,

    /// Defaults to the source column name.
    #[serde(default)]
    pub target: Option<String>,

    /// `INT`, `VARCHAR(50)`, `DECIMAL(10,2)`...
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "column type cannot be empty"))]
    pub data_type: String,

    pub length: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,

    #[serde(default = "default_nullable")]
    pub nullable: bool,

    #[serde(default)]
    pub primary_key: bool,

    /// `schema.table` or a bare table name in the curated schema. Implies
    /// a foreign key.
    #[serde(default)]
    pub references: Option<String>,
}

fn default_nullable() -> bool {
    true
}

/// A validated job with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedJob {
    pub definition: JobDefinition,
    pub mappings: MappingSet,
    pub origin: PathBuf,
}

/// Splits `VARCHAR(50)` / `DECIMAL(10,2)` into the base type and its
/// arguments.
fn parse_type_spec(spec: &str) -> Result<(DataType, Vec<u32>), DomainError> {
    let data_type = DataType::from_str(spec)?;
    let args = match spec.split_once('(') {
        None => Vec::new(),
        Some((_, rest)) => rest
            .trim_end()
            .strip_suffix(')')
            .ok_or_else(|| DomainError::Configuration(format!("malformed type '{}'", spec)))?
            .split(',')
            .map(|a| {
                a.trim().parse::<u32>().map_err(|_| {
                    DomainError::Configuration(format!("malformed type argument in '{}'", spec))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok((data_type, args))
}

fn narrow(value: u32, spec: &str) -> Result<u8, DomainError> {
    u8::try_from(value)
        .map_err(|_| DomainError::Configuration(format!("precision out of range in '{}'", spec)))
}

impl ColumnConfig {
    fn to_mapping(&self, job_name: &str) -> Result<ColumnMapping, DomainError> {
        let (data_type, args) = parse_type_spec(&self.data_type)?;

        let mut length = self.length;
        let mut precision = self.precision;
        let mut scale = self.scale;
        if data_type.is_varlen() {
            length = length.or(args.first().copied());
        } else if data_type.is_decimal() {
            if let Some(p) = args.first() {
                precision = precision.or(Some(narrow(*p, &self.data_type)?));
            }
            if let Some(s) = args.get(1) {
                scale = scale.or(Some(narrow(*s, &self.data_type)?));
            }
        }

        Ok(ColumnMapping {
            job_name: job_name.to_string(),
            source_column: self.source.clone(),
            target_column: self.target.clone().unwrap_or_else(|| self.source.clone()),
            data_type,
            length,
            precision,
            scale,
            nullable: self.nullable,
            primary_key: self.primary_key,
            foreign_key: self.references.is_some(),
            reference_table: self.references.clone(),
        })
    }
}

impl JobConfig {
    /// Converts to the domain model, collecting every problem found.
    pub fn into_definition(self) -> Result<(JobDefinition, MappingSet), DomainError> {
        let mut problems = Vec::new();

        if let Err(errors) = self.validate() {
            problems.push(errors.to_string());
        }
        if let SourceSpec::Table { schema, table, .. } = &self.source
            && (schema.trim().is_empty() || table.trim().is_empty())
        {
            problems.push("a table source must name its schema and table".to_string());
        }
        if let SourceSpec::File { location, .. } = &self.source
            && location.trim().is_empty()
        {
            problems.push("a file source must name its location".to_string());
        }

        let mut columns = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            match column.to_mapping(&self.name) {
                Ok(mapping) => columns.push(mapping),
                Err(e) => problems.push(e.to_string()),
            }
        }

        let definition = JobDefinition {
            name: self.name,
            source: self.source,
            target_schema: self.target_schema,
            target_table: self.target_table,
            load_type: self.load_type,
            scd_type: self.scd_type,
            reject_threshold: self.reject_threshold,
        };
        let mappings = MappingSet::new(columns);
        if let Err(DomainError::Configuration(msg)) = mappings.validate_for(&definition) {
            problems.push(msg);
        }

        if problems.is_empty() {
            Ok((definition, mappings))
        } else {
            Err(DomainError::Configuration(format!(
                "job '{}': {}",
                definition.name,
                problems.join("; ")
            )))
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

/// Loads every job file under `job_paths`. All problems across all files
/// are reported together; nothing is returned unless every job is valid.
#[instrument(skip(project_dir, job_paths))]
pub fn load_jobs(project_dir: &Path, job_paths: &[String]) -> Result<Vec<LoadedJob>, EtlError> {
    let mut loaded: Vec<LoadedJob> = Vec::new();
    let mut problems = Vec::new();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    for job_path in job_paths {
        let root = project_dir.join(job_path);
        if !root.exists() {
            debug!(path = ?root, "Job path does not exist, skipping");
            continue;
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_yaml(e.path()))
            .map(|e| e.into_path())
            .collect();
        files.sort();

        for file in files {
            let content = fs::read_to_string(&file)?;
            let parsed: JobFile = match serde_yaml::from_str(&content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    problems.push(format!("{}: {}", file.display(), e));
                    continue;
                }
            };

            for job in parsed.jobs {
                match job.into_definition() {
                    Ok((definition, mappings)) => {
                        if let Some(first) = seen.get(&definition.name) {
                            problems.push(format!(
                                "job '{}' defined in both {} and {}",
                                definition.name,
                                first.display(),
                                file.display()
                            ));
                            continue;
                        }
                        seen.insert(definition.name.clone(), file.clone());
                        loaded.push(LoadedJob {
                            definition,
                            mappings,
                            origin: file.clone(),
                        });
                    }
                    Err(e) => problems.push(format!("{}: {}", file.display(), e)),
                }
            }
        }
    }

    if !problems.is_empty() {
        return Err(DomainError::Configuration(problems.join("\n")).into());
    }
    debug!("Loaded {} job definitions", loaded.len());
    Ok(loaded)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::job::FileFormat;
    use anyhow::Result;
    use tempfile::tempdir;

    const EMP: &str = r#"
jobs:
  - name: JOB_EMP
    source: { kind: file, format: csv, location: data/employees }
    target_schema: processed
    target_table: employee
    load_type: incremental
    scd_type: type2
    columns:
      - { source: emp_id, target: EmployeeID, type: INT, primary_key: true }
      - { source: dept, target: Dept, type: "VARCHAR(50)", nullable: false }
      - { source: status, target: Status, type: VARCHAR, length: 20 }
      - { source: salary, target: Salary, type: "DECIMAL(10,2)" }
      - { source: dept_id, target: DeptID, type: INT, references: curated.department }
"#;

    fn write_jobs(content: &str) -> Result<tempfile::TempDir> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("jobs"))?;
        fs::write(dir.path().join("jobs").join("emp.yaml"), content)?;
        Ok(dir)
    }

    #[test]
    fn test_loads_job_and_mappings() -> Result<()> {
        let dir = write_jobs(EMP)?;
        let jobs = load_jobs(dir.path(), &["jobs".to_string()])?;
        assert_eq!(jobs.len(), 1);

        let job = &jobs[0];
        assert_eq!(job.definition.scd_type, ScdType::Type2);
        assert_eq!(job.definition.load_type, LoadType::Incremental);
        assert_eq!(
            job.definition.source,
            SourceSpec::File {
                format: FileFormat::Csv,
                location: "data/employees".into()
            }
        );

        let m = &job.mappings;
        assert_eq!(m.key_columns(), vec!["EmployeeID"]);
        assert_eq!(m.get("Dept").unwrap().length, Some(50));
        assert_eq!(m.get("Status").unwrap().length, Some(20));
        assert_eq!(m.get("Salary").unwrap().precision_scale(), (10, 2));
        let fk = m.get("DeptID").unwrap();
        assert!(fk.foreign_key);
        assert_eq!(fk.reference_table.as_deref(), Some("curated.department"));
        Ok(())
    }

    #[test]
    fn test_reports_every_problem() -> Result<()> {
        let yaml = r#"
jobs:
  - name: BAD
    source: { kind: table, schema: "", table: "" }
    target_schema: processed
    target_table: bad
    scd_type: type2
    reject_threshold: 3.0
    columns:
      - { source: a, type: VARCHAR }
      - { source: b, type: BLOB }
"#;
        let dir = write_jobs(yaml)?;
        let err = load_jobs(dir.path(), &["jobs".to_string()]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("reject threshold"), "{}", msg);
        assert!(msg.contains("schema and table"), "{}", msg);
        assert!(msg.contains("unsupported data type 'BLOB'"), "{}", msg);
        assert!(msg.contains("requires a positive length"), "{}", msg);
        assert!(msg.contains("no column is flagged as primary key"), "{}", msg);
        assert!(err.is_configuration());
        Ok(())
    }

    #[test]
    fn test_duplicate_job_names_across_files() -> Result<()> {
        let dir = write_jobs(EMP)?;
        fs::write(dir.path().join("jobs").join("emp_copy.yml"), EMP)?;
        let err = load_jobs(dir.path(), &["jobs".to_string()]).unwrap_err();
        assert!(err.to_string().contains("defined in both"));
        Ok(())
    }

    #[test]
    fn test_missing_job_path_is_empty() -> Result<()> {
        let dir = tempdir()?;
        assert!(load_jobs(dir.path(), &["jobs".to_string()])?.is_empty());
        Ok(())
    }
}
