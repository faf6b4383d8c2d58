use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use relay_api::{BackendWriter, NativeWrite, RelayError, WriteShape};

// ═══════════════════════════════════════════════════════════════
//  MemoryWriterConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_records() -> usize {
    100_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryWriterConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Каждая запись завершается ошибкой (проверка того, что отказ
    /// backend'а не ломает подтверждение).
    #[serde(default)]
    pub fail_writes: bool,
}

impl Default for MemoryWriterConfig {
    fn default() -> Self {
        Self { max_records: default_max_records(), fail_writes: false }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryWriter
// ═══════════════════════════════════════════════════════════════

/// In-memory ring buffer: хранит последние `max_records` записей
/// в нативном представлении.
pub struct MemoryWriter {
    name: String,
    writes: RwLock<VecDeque<NativeWrite>>,
    max_records: usize,
    fail_writes: AtomicBool,
}

impl MemoryWriter {
    pub fn new(name: impl Into<String>, config: &MemoryWriterConfig) -> Self {
        Self {
            name: name.into(),
            writes: RwLock::new(VecDeque::with_capacity(config.max_records.min(65536))),
            max_records: config.max_records,
            fail_writes: AtomicBool::new(config.fail_writes),
        }
    }

    /// Переключить режим отказа на лету.
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::Release);
    }

    pub async fn snapshot(&self) -> Vec<NativeWrite> {
        self.writes.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.writes.read().await.len()
    }
}

impl BackendWriter for MemoryWriter {
    fn name(&self) -> &str {
        &self.name
    }

    /// Хранит нативную запись как есть, форма не важна.
    fn accepts(&self, _shape: WriteShape) -> bool {
        true
    }

    fn write<'a>(&'a self, write: &'a NativeWrite) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::Acquire) {
                return Err(RelayError::io(format!("{}: write rejected", self.name)));
            }
            let mut buf = self.writes.write().await;
            if buf.len() >= self.max_records {
                buf.pop_front();
            }
            buf.push_back(write.clone());
            Ok(())
        })
    }
}
