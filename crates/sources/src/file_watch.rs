//! Filesystem watcher source.
//!
//! Watches glob patterns for created or modified files and emits each
//! matching file's contents as an event. The dedup key hashes path, mtime
//! and size, so editor double-fires and overlapping create+modify
//! notifications for the same write collapse to one event.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::event::{EventKind, ModifyKind};
use notify::{RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use inflow_core::SourceType;
use inflow_normalize::{sha256_hex, PayloadFormat, RawEvent};

use crate::adapter::{AdapterContext, SourceAdapter};
use crate::error::AdapterError;

fn default_recursive() -> bool {
    true
}

fn default_format() -> PayloadFormat {
    PayloadFormat::Json
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileWatchConfig {
    /// Glob patterns selecting the files to watch, e.g. `data/incoming/*.json`.
    pub patterns: Vec<String>,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Emit events for files already present when the watcher starts.
    #[serde(default)]
    pub initial_scan: bool,
    /// How matched files are parsed. One format per source; a directory
    /// with mixed file types takes one source per format, each with its
    /// own globs.
    #[serde(default = "default_format")]
    pub format: PayloadFormat,
}

pub struct FileWatchSource {
    id: String,
    config: FileWatchConfig,
}

impl FileWatchSource {
    pub fn new(id: impl Into<String>, config: FileWatchConfig) -> Self {
        Self {
            id: id.into(),
            config,
        }
    }

    fn build_globset(&self) -> Result<GlobSet, AdapterError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.config.patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| AdapterError::Config(format!("invalid glob {pattern}: {e}")))?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| AdapterError::Config(format!("cannot build glob set: {e}")))
    }

    /// Directories the watcher registers: the longest literal prefix of
    /// each pattern, before any glob metacharacter.
    fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = Vec::new();
        for pattern in &self.config.patterns {
            let mut root = PathBuf::new();
            for component in Path::new(pattern).components() {
                let text = component.as_os_str().to_string_lossy();
                if text.contains(['*', '?', '[', '{']) {
                    break;
                }
                root.push(component);
            }
            if root.as_os_str().is_empty() {
                root.push(".");
            }
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        roots
    }

    async fn emit_file(&self, ctx: &AdapterContext, path: &Path) {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                // File may have been removed between the notification and
                // the read; not an adapter failure.
                debug!(source_id = %self.id, path = %path.display(), error = %e, "cannot read changed file");
                return;
            }
        };

        let stamp = match tokio::fs::metadata(path).await {
            Ok(meta) => {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                format!("{}:{}:{}", path.display(), mtime, meta.len())
            }
            Err(_) => format!("{}:0:{}", path.display(), bytes.len()),
        };

        let raw = RawEvent {
            source_id: self.id.clone(),
            source_type: SourceType::FileWatch,
            route: path.display().to_string(),
            format: self.config.format.clone(),
            bytes,
            dedup_hint: Some(sha256_hex(stamp.as_bytes())),
        };
        if ctx.sink.submit_raw(raw).await.is_err() {
            warn!(source_id = %self.id, path = %path.display(), "changed file did not decode");
        }
    }

    async fn initial_scan(&self, ctx: &AdapterContext, globs: &GlobSet) {
        for root in self.watch_roots() {
            let walker = if self.config.recursive {
                WalkDir::new(&root)
            } else {
                WalkDir::new(&root).max_depth(1)
            };
            for entry in walker.into_iter().filter_map(Result::ok) {
                if entry.file_type().is_file() && globs.is_match(entry.path()) {
                    self.emit_file(ctx, entry.path()).await;
                }
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for FileWatchSource {
    fn adapter_id(&self) -> &str {
        &self.id
    }

    fn source_type(&self) -> SourceType {
        SourceType::FileWatch
    }

    async fn start(&self, _ctx: &AdapterContext) -> Result<(), AdapterError> {
        if self.config.patterns.is_empty() {
            return Err(AdapterError::Config(
                "file watch source needs at least one pattern".to_string(),
            ));
        }
        self.build_globset()?;
        self.config
            .format
            .validate()
            .map_err(|e| AdapterError::Config(e.to_string()))?;

        for root in self.watch_roots() {
            if !root.exists() {
                return Err(AdapterError::Config(format!(
                    "watch root does not exist: {}",
                    root.display()
                )));
            }
        }
        Ok(())
    }

    async fn run(&self, ctx: &AdapterContext) -> Result<(), AdapterError> {
        let globs = self.build_globset()?;

        let (tx, mut rx) = mpsc::channel::<notify::Result<notify::Event>>(256);
        let mut watcher = notify::recommended_watcher(move |res| {
            // Dropped events just mean a slow consumer; the dedup stamp
            // makes redelivery harmless.
            let _ = tx.blocking_send(res);
        })
        .map_err(|e| AdapterError::Watch(e.to_string()))?;

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        for root in self.watch_roots() {
            watcher
                .watch(&root, mode)
                .map_err(|e| AdapterError::Watch(format!("{}: {e}", root.display())))?;
            info!(source_id = %self.id, root = %root.display(), "watching");
        }

        if self.config.initial_scan {
            self.initial_scan(ctx, &globs).await;
        }

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                next = rx.recv() => {
                    let Some(next) = next else { return Ok(()) };
                    let event = next.map_err(|e| AdapterError::Watch(e.to_string()))?;
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_)
                            | EventKind::Modify(ModifyKind::Data(_))
                            | EventKind::Modify(ModifyKind::Any)
                    );
                    if !relevant {
                        continue;
                    }
                    for path in &event.paths {
                        if globs.is_match(path) && path.is_file() {
                            self.emit_file(ctx, path).await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::adapter::CursorCell;
    use crate::sink::{AdapterStats, EventSink};
    use inflow_normalize::Normalizer;

    fn config(patterns: Vec<&str>) -> FileWatchConfig {
        FileWatchConfig {
            patterns: patterns.into_iter().map(str::to_string).collect(),
            recursive: true,
            initial_scan: false,
            format: PayloadFormat::Json,
        }
    }

    fn test_ctx(cap: usize) -> (AdapterContext, mpsc::Receiver<inflow_core::IngestionEvent>) {
        let (tx, rx) = mpsc::channel(cap);
        let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        // Leak the sender so the watch channel stays open for the test.
        std::mem::forget(_cancel_tx);
        let ctx = AdapterContext {
            sink: EventSink::new(
                "fw-1",
                tx,
                Arc::new(Normalizer::default()),
                Duration::from_millis(50),
                Arc::new(AdapterStats::default()),
            ),
            cancel: cancel_rx,
            cursor: CursorCell::default(),
        };
        (ctx, rx)
    }

    #[test]
    fn watch_roots_strip_glob_suffix() {
        let source = FileWatchSource::new("fw-1", config(vec!["data/incoming/*.json"]));
        assert_eq!(source.watch_roots(), vec![PathBuf::from("data/incoming")]);

        let source = FileWatchSource::new("fw-1", config(vec!["*.json"]));
        assert_eq!(source.watch_roots(), vec![PathBuf::from(".")]);
    }

    #[test]
    fn invalid_glob_fails_construction_checks() {
        let source = FileWatchSource::new("fw-1", config(vec!["data/[unclosed"]));
        assert!(matches!(
            source.build_globset(),
            Err(AdapterError::Config(_))
        ));
    }

    #[tokio::test]
    async fn missing_root_fails_start() {
        let source = FileWatchSource::new(
            "fw-1",
            config(vec!["/definitely/not/a/real/dir/*.json"]),
        );
        let (ctx, _rx) = test_ctx(4);
        assert!(matches!(
            source.start(&ctx).await,
            Err(AdapterError::Config(_))
        ));
    }

    #[tokio::test]
    async fn initial_scan_emits_existing_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), br#"{"n":1}"#).unwrap();
        std::fs::write(dir.path().join("b.txt"), b"ignored").unwrap();

        let pattern = format!("{}/*.json", dir.path().display());
        let source = FileWatchSource::new("fw-1", config(vec![&pattern]));
        let (ctx, mut rx) = test_ctx(4);

        let globs = source.build_globset().unwrap();
        source.initial_scan(&ctx, &globs).await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.payload["n"], 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn same_content_same_stamp_dedups_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.json");
        std::fs::write(&file, br#"{"n":1}"#).unwrap();

        let pattern = format!("{}/*.json", dir.path().display());
        let source = FileWatchSource::new("fw-1", config(vec![&pattern]));
        let (ctx, mut rx) = test_ctx(4);

        source.emit_file(&ctx, &file).await;
        source.emit_file(&ctx, &file).await;

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        // Identical stamps produce identical keys; the manager's dedup
        // window suppresses the second delivery.
        assert_eq!(first.dedup_key, second.dedup_key);
    }
}
