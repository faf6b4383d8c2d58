use std::time::Duration;

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

/// Стратегия партиционирования файлов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionBy {
    /// Один файл на день: `{data_dir}/{YYYY-MM-DD}.jsonl`
    #[default]
    Date,
    /// Всё в один файл: `{data_dir}/{file_name}.jsonl`
    Single,
}

fn default_file_name() -> String {
    "records".into()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileWriterConfig {
    pub data_dir: String,
    #[serde(default)]
    pub partition_by: PartitionBy,
    /// Имя файла для `partition_by = "single"`, без расширения.
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

impl FileWriterConfig {
    pub fn new(data_dir: impl Into<String>) -> Self {
        Self { data_dir: data_dir.into(), partition_by: PartitionBy::default(), file_name: default_file_name() }
    }
}

// ════════════════════════════════════════════════════════════════
//  On-disk line format
// ════════════════════════════════════════════════════════════════

/// Одна строка JSONL. `ts_ms` — момент записи, по нему выбирается
/// дневной файл.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DiskLine {
    pub ts_ms: i64,
    #[serde(flatten)]
    pub body: DiskBody,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiskBody {
    Row {
        statement: String,
        params: Vec<String>,
    },
    Document {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_ms: Option<u64>,
        body: serde_json::Value,
    },
}

impl DiskBody {
    pub(crate) fn from_write(write: &relay_api::NativeWrite) -> Self {
        match write {
            relay_api::NativeWrite::Relational { statement, params, .. } => {
                DiskBody::Row { statement: statement.clone(), params: params.clone() }
            }
            relay_api::NativeWrite::Document { key, body, ttl } => DiskBody::Document {
                key: key.clone(),
                ttl_ms: ttl.map(|d: Duration| d.as_millis() as u64),
                body: body.clone(),
            },
        }
    }
}
