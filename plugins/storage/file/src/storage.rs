use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use relay_api::{date_from_ms, now_ms, BackendWriter, NativeWrite, RelayError, WriteShape};

use super::config::{DiskBody, DiskLine, FileWriterConfig, PartitionBy};

// ════════════════════════════════════════════════════════════════
//  FileWriter
// ════════════════════════════════════════════════════════════════

pub struct FileWriter {
    name: String,
    data_dir: PathBuf,
    partition_by: PartitionBy,
    file_name: String,
    /// Строки из параллельных `write` не должны перемежаться.
    append_lock: Mutex<()>,
}

impl FileWriter {
    pub fn new(name: impl Into<String>, config: &FileWriterConfig) -> Self {
        Self {
            name: name.into(),
            data_dir: PathBuf::from(&config.data_dir),
            partition_by: config.partition_by,
            file_name: config.file_name.clone(),
            append_lock: Mutex::new(()),
        }
    }

    /// Путь к файлу для записи с меткой `ts_ms`.
    fn line_path(&self, ts_ms: i64) -> PathBuf {
        match self.partition_by {
            PartitionBy::Date => self.data_dir.join(format!("{}.jsonl", date_from_ms(ts_ms))),
            PartitionBy::Single => self.data_dir.join(format!("{}.jsonl", self.file_name)),
        }
    }

    async fn append(&self, write: &NativeWrite) -> Result<(), RelayError> {
        let line = DiskLine { ts_ms: now_ms(), body: DiskBody::from_write(write) };
        let mut text = serde_json::to_string(&line)
            .map_err(|e| RelayError::format_err(format!("json serialize: {e}")))?;
        text.push('\n');

        let path = self.line_path(line.ts_ms);
        let _guard = self.append_lock.lock().await;
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| RelayError::io(format!("mkdir {}: {e}", self.data_dir.display())))?;
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| RelayError::io(format!("open {}: {e}", path.display())))?;
        f.write_all(text.as_bytes())
            .await
            .map_err(|e| RelayError::io(format!("write {}: {e}", path.display())))?;
        f.flush().await.map_err(|e| RelayError::io(format!("flush: {e}")))
    }

    // ── Read back ──

    /// Все строки из всех `.jsonl` файлов каталога, файлы по имени
    /// (для дневных файлов это хронологический порядок).
    pub async fn read_all(&self) -> Result<Vec<DiskLine>, RelayError> {
        let mut result = Vec::new();
        for path in self.files().await? {
            read_file(&path, &mut result).await?;
        }
        Ok(result)
    }

    async fn files(&self) -> Result<Vec<PathBuf>, RelayError> {
        let mut dir = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(d) => d,
            Err(_) => return Ok(Vec::new()),
        };

        let mut files = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| RelayError::io(format!("read_dir: {e}")))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

async fn read_file(path: &Path, out: &mut Vec<DiskLine>) -> Result<(), RelayError> {
    let f = tokio::fs::File::open(path)
        .await
        .map_err(|e| RelayError::io(format!("open {}: {e}", path.display())))?;
    let mut lines = tokio::io::BufReader::new(f).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| RelayError::io(format!("read line: {e}")))?
    {
        if line.is_empty() {
            continue;
        }
        let parsed: DiskLine = serde_json::from_str(&line)
            .map_err(|e| RelayError::format_err(format!("parse {}: {e}", path.display())))?;
        out.push(parsed);
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════
//  BackendWriter impl
// ════════════════════════════════════════════════════════════════

impl BackendWriter for FileWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, _shape: WriteShape) -> bool {
        true
    }

    fn write<'a>(&'a self, write: &'a NativeWrite) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + 'a>> {
        Box::pin(self.append(write))
    }
}
