use crate::error::BatchError;
use crate::types::{DispatchOutcome, DispatchRequest};

use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info};

pub const BATCH_LOG_HEADER: [&str; 5] = ["timestamp", "phone_number", "message", "call_sid", "status"];
pub const ROW_TIMESTAMP: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const FILE_TIMESTAMP: &[FormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]");

#[derive(Deserialize, Debug)]
struct BatchRow {
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Read a batch source with columns `phone_number, message`.  Rows without a number are kept
/// (with an empty destination) so the dispatcher can record them as skipped.
pub fn read_batch_file(path: &Path) -> Result<Vec<DispatchRequest>, BatchError> {
    let file = File::open(path)?;
    let requests = read_batch(file)?;
    info!(path=%path.display(), rows=requests.len(), "loaded batch source");
    Ok(requests)
}

pub fn read_batch<R: Read>(source: R) -> Result<Vec<DispatchRequest>, BatchError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(source);
    let mut requests = vec![];
    for row in reader.deserialize::<BatchRow>() {
        let row = row?;
        let request = DispatchRequest::new(row.phone_number.unwrap_or_default());
        requests.push(match row.message.filter(|m| !m.is_empty()) {
            Some(message) => request.with_message(message),
            None => request,
        });
    }
    Ok(requests)
}

/// Durable record of a batch, one row per attempted request, flushed as each row is written.
pub struct BatchLog<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl BatchLog<File> {
    /// Create `call_log_YYYYMMDD_HHMMSS.csv` in `dir`
    pub fn create_in(dir: &Path) -> Result<(Self, PathBuf), BatchError> {
        let stamp = OffsetDateTime::now_utc().format(FILE_TIMESTAMP)?;
        let path = dir.join(format!("call_log_{stamp}.csv"));
        let file = File::create(&path)?;
        debug!(path=%path.display(), "created batch log");
        Ok((Self::new(file)?, path))
    }
}

impl<W: Write> BatchLog<W> {
    pub fn new(sink: W) -> Result<Self, BatchError> {
        let mut writer = csv::Writer::from_writer(sink);
        writer.write_record(BATCH_LOG_HEADER)?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn record(
        &mut self,
        request: &DispatchRequest,
        outcome: &DispatchOutcome,
    ) -> Result<(), BatchError> {
        let timestamp = OffsetDateTime::now_utc().format(ROW_TIMESTAMP)?;
        self.writer.write_record([
            timestamp.as_str(),
            request.to.as_str(),
            request.message.as_deref().unwrap_or(""),
            outcome.call_sid().unwrap_or(""),
            outcome.status_label(),
        ])?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(w) => w,
            Err(e) => panic!("flush failed: {e}"),
        }
    }
}
