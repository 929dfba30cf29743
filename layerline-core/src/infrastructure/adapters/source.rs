// layerline-core/src/infrastructure/adapters/source.rs

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::domain::job::FileFormat;
use crate::domain::value::{Record, Value};
use crate::error::EtlError;
use crate::infrastructure::fs::discover_source_files;
use crate::ports::connector::Connector;
use crate::ports::source::{SourceFile, SourceReader};

/// Reads CSV and JSON files through DuckDB's file readers.
pub struct DuckDBSourceReader {
    connector: Arc<dyn Connector>,
    base_dir: PathBuf,
}

impl DuckDBSourceReader {
    /// Relative source locations resolve against `base_dir`.
    pub fn new(connector: Arc<dyn Connector>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            connector,
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

fn scan_sql(path: &Path, format: FileFormat) -> String {
    let literal = path.to_string_lossy().replace('\'', "''");
    match format {
        FileFormat::Csv => format!(
            "SELECT * FROM read_csv_auto('{}', all_varchar = true, header = true)",
            literal
        ),
        FileFormat::Json => format!("SELECT * FROM read_json_auto('{}')", literal),
    }
}

#[async_trait]
impl SourceReader for DuckDBSourceReader {
    async fn discover(
        &self,
        location: &str,
        format: FileFormat,
    ) -> Result<Vec<SourceFile>, EtlError> {
        let root = self.resolve(location);
        Ok(discover_source_files(&root, format.extensions())?)
    }

    async fn read(&self, file: &SourceFile, format: FileFormat) -> Result<Vec<Record>, EtlError> {
        if std::fs::metadata(&file.path)?.len() == 0 {
            return Ok(Vec::new());
        }

        let result = self.connector.query(&scan_sql(&file.path, format), &[]).await?;
        debug!(
            "Read {} rows from {}",
            result.rows.len(),
            file.path.display()
        );

        let rows = result
            .rows
            .into_iter()
            .map(|cells| {
                result
                    .columns
                    .iter()
                    .cloned()
                    .zip(cells.into_iter().map(|c| c.map(Value::Text).unwrap_or_default()))
                    .collect::<Record>()
            })
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::duckdb::DuckDBConnector;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_reads_csv_as_text() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("emp"))?;
        fs::write(
            dir.path().join("emp").join("emp_2024_01_01.csv"),
            "EmployeeID,Dept\n007,Eng\n101,\n",
        )?;
        fs::write(dir.path().join("emp").join("empty_2024_01_02.csv"), "")?;

        let reader = DuckDBSourceReader::new(Arc::new(DuckDBConnector::new(":memory:")?), dir.path());
        let files = reader.discover("emp", FileFormat::Csv).await?;
        assert_eq!(files.len(), 2);

        let rows = reader.read(&files[0], FileFormat::Csv).await?;
        assert_eq!(rows.len(), 2);
        // all_varchar keeps leading zeros.
        assert_eq!(rows[0]["EmployeeID"], Value::from("007"));
        assert!(rows[1]["Dept"].is_blank());

        assert!(reader.read(&files[1], FileFormat::Csv).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_reads_json_records() -> Result<()> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("dept.json"),
            r#"[{"DeptID": 1, "Name": "Eng"}, {"DeptID": 2, "Name": "Ops"}]"#,
        )?;

        let reader = DuckDBSourceReader::new(Arc::new(DuckDBConnector::new(":memory:")?), dir.path());
        let files = reader.discover("dept.json", FileFormat::Json).await?;
        let rows = reader.read(&files[0], FileFormat::Json).await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["DeptID"], Value::from("2"));
        assert_eq!(rows[1]["Name"], Value::from("Ops"));
        Ok(())
    }
}
