//! JSON-lines backend writer: каждая нативная запись дописывается
//! строкой в файл текущего дня или в один общий файл.

mod config;
mod storage;

pub use config::{DiskBody, DiskLine, FileWriterConfig, PartitionBy};
pub use storage::FileWriter;
