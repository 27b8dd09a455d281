//! 数据源管理命令

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use atp_datasource::{DataSourceReader, FileDataSourceReader};
use atp_orchestrator::RunnerConfig;

use super::output;

pub async fn handle(action: crate::DataAction) -> Result<()> {
    match action {
        crate::DataAction::Show {
            id,
            manifest,
            suffix,
            format,
        } => show_data(&id, manifest, suffix, &format).await,
        crate::DataAction::List { manifest } => list_data_sources(manifest),
    }
}

/// 按配置的数据目录和清单构造读取器
fn build_reader(manifest: Option<PathBuf>) -> Result<FileDataSourceReader> {
    let config = RunnerConfig::load()?;
    let mut reader = FileDataSourceReader::new(config.data_dir.clone());

    match manifest.or_else(|| config.manifest_path()) {
        Some(path) => {
            reader
                .load_manifest(&path)
                .with_context(|| format!("加载数据源清单失败: {}", path.display()))?;
        }
        None => {
            println!("{} 未指定数据源清单", "ℹ".yellow());
        }
    }

    Ok(reader)
}

async fn show_data(
    id: &str,
    manifest: Option<PathBuf>,
    suffix: Option<String>,
    format: &str,
) -> Result<()> {
    let reader = build_reader(manifest)?;
    if let Some(suffix) = suffix.as_deref() {
        reader.set_data_source_suffix(suffix);
    }

    let rows = reader
        .load_data(id)
        .await
        .with_context(|| format!("读取数据源失败: {}", id))?;

    if format == "table" {
        println!("\n{} 数据源 {} 共 {} 行:\n", "✓".green(), id.cyan(), rows.len());
    }
    output::output_rows(&rows, format)
}

fn list_data_sources(manifest: Option<PathBuf>) -> Result<()> {
    let reader = build_reader(manifest)?;
    let ids = reader.data_source_ids();

    if ids.is_empty() {
        println!("\n{} 没有已注册的数据源", "ℹ".yellow());
        return Ok(());
    }

    println!(
        "\n{} 数据目录 {} 下共 {} 个数据源:\n",
        "✓".green(),
        reader.data_dir().display(),
        ids.len()
    );
    for id in ids {
        println!("  • {}", id);
    }
    Ok(())
}
