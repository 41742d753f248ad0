use crate::batch::ROW_TIMESTAMP;
use crate::error::SinkError;
use crate::types::StatusEntry;

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

pub const STATUS_LOG_HEADER: [&str; 4] = ["timestamp", "call_sid", "call_status", "to_number"];

/// Append-only record of call lifecycle events
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn append(&self, entry: StatusEntry) -> Result<(), SinkError>;
}

/// CSV file sink.  The mutex only guarantees each row lands whole; rows from different calls
/// may interleave in any order.
pub struct CsvStatusLog {
    writer: Mutex<csv::Writer<File>>,
}

impl CsvStatusLog {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_empty = file.metadata()?.len() == 0;
        let mut writer = csv::Writer::from_writer(file);
        if is_empty {
            writer.write_record(STATUS_LOG_HEADER)?;
            writer.flush()?;
        }
        debug!(path=%path.display(), "opened call status log");
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }
}

#[async_trait]
impl StatusSink for CsvStatusLog {
    async fn append(&self, entry: StatusEntry) -> Result<(), SinkError> {
        let timestamp = entry.timestamp.format(ROW_TIMESTAMP)?;
        let mut writer = self.writer.lock().map_err(|_| SinkError::Poisoned)?;
        writer.write_record([
            timestamp.as_str(),
            entry.call_sid.as_str(),
            entry.call_status.as_str(),
            entry.to_number.as_str(),
        ])?;
        writer.flush()?;
        Ok(())
    }
}
