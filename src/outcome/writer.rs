//! Append-only outcome log writer.
//!
//! One JSON object per line, partitioned by UTC day into
//! `<directory>/outcomes-YYYY-MM-DD.jsonl`. Write errors are logged and the
//! record is skipped; the writer never stops the layer.

use chrono::NaiveDate;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};

use crate::outcome::recorder::OutcomeRecord;

pub fn partition_path(directory: &Path, day: NaiveDate) -> PathBuf {
    directory.join(format!("outcomes-{}.jsonl", day.format("%Y-%m-%d")))
}

#[derive(Debug)]
pub struct OutcomeWriter {
    directory: PathBuf,
    rx: mpsc::Receiver<OutcomeRecord>,
    current: Option<(NaiveDate, File)>,
}

impl OutcomeWriter {
    pub(crate) fn new(directory: impl Into<PathBuf>, rx: mpsc::Receiver<OutcomeRecord>) -> Self {
        Self {
            directory: directory.into(),
            rx,
            current: None,
        }
    }

    /// Drain records until shutdown, then flush what is already queued.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(directory = %self.directory.display(), "Outcome log writer starting");
        loop {
            tokio::select! {
                record = self.rx.recv() => match record {
                    Some(record) => self.write_logged(&record).await,
                    None => break,
                },
                _ = shutdown.recv() => {
                    self.rx.close();
                    while let Some(record) = self.rx.recv().await {
                        self.write_logged(&record).await;
                    }
                    break;
                }
            }
        }
        if let Some((_, file)) = self.current.as_mut() {
            if let Err(e) = file.flush().await {
                tracing::warn!(error = %e, "Failed to flush outcome log");
            }
        }
        tracing::debug!("Outcome log writer stopped");
    }

    async fn write_logged(&mut self, record: &OutcomeRecord) {
        if let Err(e) = self.write(record).await {
            tracing::warn!(error = %e, request_id = %record.request_id, "Failed to append outcome record");
            // reopen on the next record
            self.current = None;
        }
    }

    async fn write(&mut self, record: &OutcomeRecord) -> io::Result<()> {
        let day = record.timestamp.date_naive();
        let rotate = !matches!(&self.current, Some((open_day, _)) if *open_day == day);
        if rotate {
            fs::create_dir_all(&self.directory).await?;
            let path = partition_path(&self.directory, day);
            let file = OpenOptions::new().create(true).append(true).open(&path).await?;
            tracing::debug!(path = %path.display(), "Opened outcome log partition");
            self.current = Some((day, file));
        }
        let Some((_, file)) = self.current.as_mut() else {
            return Err(io::Error::other("outcome log partition not open"));
        };

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await
    }
}
