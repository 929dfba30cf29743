// layerline/src/commands/mod.rs

pub mod audit;
pub mod inspect;
pub mod query;
pub mod run;
pub mod sync;
pub mod validate;
pub mod watermarks;

use anyhow::Context;
use comfy_table::{Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use layerline_core::infrastructure::adapters::catalog::DuckDBCatalog;
use layerline_core::infrastructure::adapters::duckdb::DuckDBConnector;
use layerline_core::infrastructure::config::{ProjectConfig, load_project_config};
use layerline_core::ports::catalog::CatalogStore;
use layerline_core::ports::connector::{Connector, QueryResult};

/// Configuration plus an open store, shared by every command that touches
/// the database.
pub struct Project {
    pub dir: PathBuf,
    pub config: ProjectConfig,
    pub connector: Arc<dyn Connector>,
    pub catalog: Arc<dyn CatalogStore>,
}

impl Project {
    pub fn open(project_dir: &Path) -> anyhow::Result<Self> {
        let config = load_project_config(project_dir).with_context(|| {
            format!(
                "Failed to load project configuration from {:?}",
                project_dir
            )
        })?;

        let db_path = config.database_path(project_dir);
        if db_path != ":memory:"
            && let Some(parent) = Path::new(&db_path).parent()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let connector: Arc<dyn Connector> = Arc::new(
            DuckDBConnector::new(&db_path)
                .with_context(|| format!("Failed to initialize DuckDB at {}", db_path))?,
        );
        let catalog: Arc<dyn CatalogStore> = Arc::new(DuckDBCatalog::new(connector.clone()));

        Ok(Self {
            dir: project_dir.to_path_buf(),
            config,
            connector,
            catalog,
        })
    }
}

pub fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

pub fn render(result: &QueryResult) -> Table {
    let mut out = table(result.columns.iter().map(String::as_str).collect());
    for row in &result.rows {
        out.add_row(
            row.iter()
                .map(|v| v.clone().unwrap_or_else(|| "NULL".to_string()))
                .collect::<Vec<_>>(),
        );
    }
    out
}
