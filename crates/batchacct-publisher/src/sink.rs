//! Message sinks
//!
//! A sink takes one finished message batch as an opaque text blob. The
//! only shipped implementation drops batches as uniquely-named files into
//! a spool directory, where the site's message transport picks them up.
//! Broker transports plug in behind the same trait.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("couldn't hand message batch to sink: {0}")]
    Io(#[from] std::io::Error),
}

/// Where finished message batches go.
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, batch: &str) -> Result<(), SinkError>;
}

/// Writes each batch to `<dir>/<epoch-millis>-<uuid>`. The name only has
/// to be unique; the transport consumes files in any order.
pub struct FileDropSink {
    dir: PathBuf,
}

impl FileDropSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MessageSink for FileDropSink {
    async fn send(&mut self, batch: &str) -> Result<(), SinkError> {
        let name = format!("{}-{}", chrono::Utc::now().timestamp_millis(), uuid::Uuid::new_v4());
        let path = self.dir.join(name);
        tokio::fs::write(&path, batch).await?;
        info!(file = %path.display(), bytes = batch.len(), "Dropped message batch");
        Ok(())
    }
}
