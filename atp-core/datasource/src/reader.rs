//! 数据源读取

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use crate::{DataSourceError, Result};

/// 数据源读取器
#[async_trait]
pub trait DataSourceReader: Send + Sync {
    /// 按数据源 ID 加载全部数据行
    async fn load_data(&self, data_source_id: &str) -> Result<Vec<Value>>;

    /// 设置数据源后缀 (用于按环境切换数据文件)
    fn set_data_source_suffix(&self, suffix: &str);
}

/// 数据源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    /// JSON 文件
    Json,

    /// YAML 文件
    Yaml,

    /// 描述文件中内联的数据行
    Inline,
}

impl DataSourceKind {
    /// 解析数据源类型，未知类型返回 `UnsupportedKind`
    pub fn parse(id: &str, kind: &str) -> Result<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "json" => Ok(DataSourceKind::Json),
            "yaml" | "yml" => Ok(DataSourceKind::Yaml),
            "inline" => Ok(DataSourceKind::Inline),
            _ => Err(DataSourceError::UnsupportedKind {
                id: id.to_string(),
                kind: kind.to_string(),
            }),
        }
    }
}

/// 数据源描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    /// 数据源 ID
    pub id: String,

    /// 数据源类型 (json/yaml/inline)
    pub kind: String,

    /// 数据文件路径 (相对路径基于数据目录)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// 内联数据行
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Value>,
}

impl DataSourceDescriptor {
    /// 文件数据源
    pub fn file(id: &str, kind: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            path: Some(path.into()),
            rows: Vec::new(),
        }
    }

    /// 内联数据源
    pub fn inline(id: &str, rows: Vec<Value>) -> Self {
        Self {
            id: id.to_string(),
            kind: "inline".to_string(),
            path: None,
            rows,
        }
    }
}

fn current_suffix(suffix: &RwLock<Option<String>>) -> Option<String> {
    suffix
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .filter(|s| !s.is_empty())
}

fn store_suffix(slot: &RwLock<Option<String>>, suffix: &str) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = Some(suffix.to_string());
}

/// 数组展开为多行，单个对象视为一行
fn into_rows(id: &str, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(rows) => Ok(rows),
        Value::Object(_) => Ok(vec![value]),
        other => Err(DataSourceError::Parse {
            id: id.to_string(),
            message: format!("数据必须是数组或对象，实际为: {}", other),
        }),
    }
}

/// 在扩展名前插入后缀: `users.json` + `_staging` -> `users_staging.json`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    path.with_file_name(file_name)
}

/// 基于数据目录的文件数据源读取器
#[derive(Debug)]
pub struct FileDataSourceReader {
    /// 数据目录
    data_dir: PathBuf,

    /// 已注册的数据源 (ID -> 描述)
    descriptors: HashMap<String, DataSourceDescriptor>,

    /// 数据源后缀
    suffix: RwLock<Option<String>>,
}

impl FileDataSourceReader {
    /// 创建新的读取器
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            descriptors: HashMap::new(),
            suffix: RwLock::new(None),
        }
    }

    /// 注册数据源
    pub fn register(&mut self, descriptor: DataSourceDescriptor) {
        debug!("注册数据源: {} ({})", descriptor.id, descriptor.kind);
        self.descriptors.insert(descriptor.id.clone(), descriptor);
    }

    /// 链式注册数据源
    pub fn with_descriptor(mut self, descriptor: DataSourceDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    /// 从清单文件 (YAML/JSON 数组) 加载数据源描述
    pub fn load_manifest(&mut self, path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path).map_err(|source| DataSourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let manifest_id = path.display().to_string();
        let descriptors: Vec<DataSourceDescriptor> =
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                serde_json::from_str(&content).map_err(|e| DataSourceError::Parse {
                    id: manifest_id,
                    message: e.to_string(),
                })?
            } else {
                serde_yaml::from_str(&content).map_err(|e| DataSourceError::Parse {
                    id: manifest_id,
                    message: e.to_string(),
                })?
            };

        let count = descriptors.len();
        for descriptor in descriptors {
            self.register(descriptor);
        }
        info!("从清单 {:?} 加载了 {} 个数据源", path, count);
        Ok(count)
    }

    /// 数据目录
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// 已注册的数据源 ID
    pub fn data_source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.descriptors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 解析数据文件路径，后缀文件不存在时回退到原文件
    async fn resolve_path(&self, descriptor: &DataSourceDescriptor) -> Result<PathBuf> {
        let relative = descriptor
            .path
            .as_ref()
            .ok_or_else(|| DataSourceError::Parse {
                id: descriptor.id.clone(),
                message: "文件数据源缺少 path".to_string(),
            })?;
        let path = if relative.is_relative() {
            self.data_dir.join(relative)
        } else {
            relative.clone()
        };

        if let Some(suffix) = current_suffix(&self.suffix) {
            let suffixed = with_suffix(&path, &suffix);
            if tokio::fs::try_exists(&suffixed).await.unwrap_or(false) {
                return Ok(suffixed);
            }
            debug!("后缀数据文件 {:?} 不存在，使用 {:?}", suffixed, path);
        }

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(DataSourceError::NotFound(format!(
                "{} ({})",
                descriptor.id,
                path.display()
            )));
        }
        Ok(path)
    }
}

#[async_trait]
impl DataSourceReader for FileDataSourceReader {
    async fn load_data(&self, data_source_id: &str) -> Result<Vec<Value>> {
        let descriptor = self
            .descriptors
            .get(data_source_id)
            .ok_or_else(|| DataSourceError::NotFound(data_source_id.to_string()))?;
        let kind = DataSourceKind::parse(&descriptor.id, &descriptor.kind)?;

        if kind == DataSourceKind::Inline {
            return Ok(descriptor.rows.clone());
        }

        let path = self.resolve_path(descriptor).await?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| DataSourceError::Io {
                path: path.clone(),
                source,
            })?;

        let value: Value = match kind {
            DataSourceKind::Json => serde_json::from_str(&content).map_err(|e| {
                DataSourceError::Parse {
                    id: data_source_id.to_string(),
                    message: e.to_string(),
                }
            })?,
            _ => serde_yaml::from_str(&content).map_err(|e| DataSourceError::Parse {
                id: data_source_id.to_string(),
                message: e.to_string(),
            })?,
        };

        let rows = into_rows(data_source_id, value)?;
        debug!("数据源 {} 加载了 {} 行 ({:?})", data_source_id, rows.len(), path);
        Ok(rows)
    }

    fn set_data_source_suffix(&self, suffix: &str) {
        info!("设置数据源后缀: {}", suffix);
        store_suffix(&self.suffix, suffix);
    }
}

/// 内存数据源读取器
///
/// 设置后缀后优先查找 `{id}{suffix}`，不存在时回退到 `{id}`。
#[derive(Debug, Default)]
pub struct InMemoryDataSourceReader {
    sources: RwLock<HashMap<String, Vec<Value>>>,
    suffix: RwLock<Option<String>>,
}

impl InMemoryDataSourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加或替换数据源
    pub fn insert(&self, data_source_id: &str, rows: Vec<Value>) {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(data_source_id.to_string(), rows);
    }

    /// 链式添加数据源
    pub fn with_rows(self, data_source_id: &str, rows: Vec<Value>) -> Self {
        self.insert(data_source_id, rows);
        self
    }
}

#[async_trait]
impl DataSourceReader for InMemoryDataSourceReader {
    async fn load_data(&self, data_source_id: &str) -> Result<Vec<Value>> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(suffix) = current_suffix(&self.suffix) {
            if let Some(rows) = sources.get(&format!("{}{}", data_source_id, suffix)) {
                return Ok(rows.clone());
            }
        }
        sources
            .get(data_source_id)
            .cloned()
            .ok_or_else(|| DataSourceError::NotFound(data_source_id.to_string()))
    }

    fn set_data_source_suffix(&self, suffix: &str) {
        store_suffix(&self.suffix, suffix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse() {
        assert_eq!(DataSourceKind::parse("a", "JSON").unwrap(), DataSourceKind::Json);
        assert_eq!(DataSourceKind::parse("a", "yml").unwrap(), DataSourceKind::Yaml);
        assert!(matches!(
            DataSourceKind::parse("a", "excel"),
            Err(DataSourceError::UnsupportedKind { kind, .. }) if kind == "excel"
        ));
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(
            with_suffix(Path::new("/data/users.json"), "_staging"),
            PathBuf::from("/data/users_staging.json")
        );
        assert_eq!(
            with_suffix(Path::new("rows"), "-dev"),
            PathBuf::from("rows-dev")
        );
    }

    #[test]
    fn test_into_rows() {
        assert_eq!(into_rows("a", json!([1, 2])).unwrap().len(), 2);
        assert_eq!(into_rows("a", json!({"k": 1})).unwrap().len(), 1);
        assert!(into_rows("a", json!("text")).is_err());
    }

    #[tokio::test]
    async fn test_in_memory_reader_suffix_fallback() {
        let reader = InMemoryDataSourceReader::new()
            .with_rows("users", vec![json!({"env": "default"})])
            .with_rows("users_qa", vec![json!({"env": "qa"})]);

        assert_eq!(reader.load_data("users").await.unwrap()[0]["env"], "default");

        reader.set_data_source_suffix("_qa");
        assert_eq!(reader.load_data("users").await.unwrap()[0]["env"], "qa");

        reader.set_data_source_suffix("_prod");
        assert_eq!(reader.load_data("users").await.unwrap()[0]["env"], "default");

        assert!(matches!(
            reader.load_data("orders").await,
            Err(DataSourceError::NotFound(_))
        ));
    }
}
