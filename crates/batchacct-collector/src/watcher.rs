//! Directory watch event loop
//!
//! Bridges platform file-watch notifications into a channel consumed by a
//! single task, which drives one parse-normalize-insert pass per event to
//! completion before waiting again. Within one watched file records are
//! processed strictly in append order; on a rotation the previous file's
//! trailing records are flushed before the new file is watched.

use crate::insert::{insert_batch, InsertOptions, InsertStats};
use crate::parser::{parse_records, WatchState};
use batchacct_common::schema::TableSchema;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use sqlx::PgPool;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};

/// Filesystem events the collector reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Renamed(PathBuf),
}

/// Start watching `dir` (non-recursively) and return the watcher handle
/// plus the event channel. The handle must be kept alive for the watch to
/// stay registered.
pub fn watch_dir(dir: &Path) -> anyhow::Result<(RecommendedWatcher, UnboundedReceiver<FsEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let event = match res {
            Ok(event) => event,
            Err(_) => return,
        };
        let kind = event.kind;
        for path in event.paths {
            let fs_event = match kind {
                EventKind::Create(_) => Some(FsEvent::Created(path)),
                EventKind::Modify(ModifyKind::Name(_)) => Some(FsEvent::Renamed(path)),
                EventKind::Modify(_) => Some(FsEvent::Modified(path)),
                _ => None,
            };
            if let Some(fs_event) = fs_event {
                // The receiver going away means we're shutting down.
                let _ = tx.send(fs_event);
            }
        }
    })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

/// Pick the most recently modified file in `dir` whose name matches
/// `pattern`.
pub fn latest_file(dir: &Path, pattern: &Regex) -> anyhow::Result<PathBuf> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !pattern.is_match(name) {
            continue;
        }
        let mtime = entry.metadata()?.modified()?;
        if newest.as_ref().map(|(t, _)| mtime > *t).unwrap_or(true) {
            newest = Some((mtime, entry.path()));
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| anyhow::anyhow!("No accounting file matching pattern in {}", dir.display()))
}

/// The collector: one watched accounting file, its parser state and insert
/// counters, and the single database pool.
pub struct Collector {
    pool: PgPool,
    schema: Arc<TableSchema>,
    dir: PathBuf,
    pattern: Regex,
    file: PathBuf,
    state: WatchState,
    stats: InsertStats,
    opts: InsertOptions,
}

impl Collector {
    /// Set up against the newest matching file in `dir`. Fails when no
    /// accounting file is present; that is a setup error, not a runtime
    /// one.
    pub fn new(
        pool: PgPool,
        schema: Arc<TableSchema>,
        dir: PathBuf,
        pattern: Regex,
        opts: InsertOptions,
    ) -> anyhow::Result<Self> {
        let file = latest_file(&dir, &pattern)?;
        info!(file = %file.display(), "Watching accounting file");
        Ok(Self {
            pool,
            schema,
            dir,
            pattern,
            file,
            state: WatchState::default(),
            stats: InsertStats::new(),
            opts,
        })
    }

    /// Consume filesystem events until the channel closes. Each event is
    /// handled synchronously and in order; suspension happens only at the
    /// channel receive.
    pub async fn run(mut self, mut rx: UnboundedReceiver<FsEvent>) -> anyhow::Result<()> {
        // Catch up on records appended while we weren't running.
        self.drain().await;

        while let Some(event) = rx.recv().await {
            match event {
                FsEvent::Modified(path) if path == self.file => self.drain().await,
                FsEvent::Renamed(path) if path == self.file => {
                    info!(file = %path.display(), "Accounting file rotated away");
                },
                FsEvent::Created(created) => self.handle_created(created).await,
                _ => {},
            }
        }
        Ok(())
    }

    /// A file appeared in the watched directory: flush whatever the old
    /// file still holds, then move the watch to the newest matching file.
    async fn handle_created(&mut self, created: PathBuf) {
        self.drain().await;

        let newest = match latest_file(&self.dir, &self.pattern) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Couldn't list accounting files");
                return;
            },
        };

        if newest != self.file {
            self.file = newest;
            self.state = WatchState::default();
            self.stats = InsertStats::new();
            info!(file = %self.file.display(), "Now watching");
        } else if created == self.file {
            // Same name recreated after a rotation: new file, fresh offset.
            self.state = WatchState::default();
            info!(file = %self.file.display(), "Accounting file recreated, resetting offset");
        }
    }

    /// One full pass: parse all newly available records and insert them.
    async fn drain(&mut self) {
        let file = match File::open(&self.file) {
            Ok(f) => f,
            Err(e) => {
                error!(file = %self.file.display(), error = %e, "Couldn't open acct file");
                return;
            },
        };

        let mut reader = BufReader::new(file);
        let records = match parse_records(&mut reader, &mut self.state) {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Couldn't read acct file");
                return;
            },
        };

        self.stats = insert_batch(&self.pool, &self.schema, &records, self.stats, &self.opts).await;
    }
}
