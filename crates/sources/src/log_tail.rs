//! Log tailing source.
//!
//! Follows an append-only log file, emitting one event per complete line.
//! Partial trailing lines are buffered until their newline arrives.
//! Rotation is detected by an inode change or a shrinking file; after
//! rotation the tail restarts at offset zero so post-rotation lines are
//! read exactly once. The dedup key hashes line content together with its
//! byte offset, so legitimately repeated log lines are not suppressed.

use async_trait::async_trait;
use serde::Deserialize;
use std::io::SeekFrom;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

use inflow_core::SourceType;
use inflow_normalize::{sha256_hex, PayloadFormat, RawEvent};

use crate::adapter::{AdapterContext, SourceAdapter};
use crate::error::AdapterError;

/// Where tailing begins when there is no cursor to resume from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    Beginning,
    /// Skip existing content; only lines appended after startup are emitted.
    #[default]
    End,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_format() -> PayloadFormat {
    PayloadFormat::Plain
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogTailConfig {
    pub path: String,
    #[serde(default)]
    pub start_position: StartPosition,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How each line is parsed; plain, syslog, or a regex with named groups.
    #[serde(default = "default_format")]
    pub format: PayloadFormat,
    /// Route carried by emitted events; defaults to the file path.
    #[serde(default)]
    pub route: Option<String>,
}

#[derive(Debug, Default)]
struct TailState {
    offset: u64,
    inode: Option<u64>,
    /// Trailing bytes of an incomplete line. Kept raw: lossy UTF-8
    /// decoding can change the byte count, and offsets are byte positions.
    partial: Vec<u8>,
}

pub struct LogTailSource {
    id: String,
    config: LogTailConfig,
    route: String,
    state: Mutex<TailState>,
}

impl LogTailSource {
    pub fn new(id: impl Into<String>, config: LogTailConfig) -> Self {
        let route = config.route.clone().unwrap_or_else(|| config.path.clone());
        Self {
            id: id.into(),
            config,
            route,
            state: Mutex::new(TailState::default()),
        }
    }

    /// One tail cycle: detect rotation, read appended bytes, emit complete
    /// lines. Returns how many events were enqueued.
    async fn read_new_lines(&self, ctx: &AdapterContext) -> Result<usize, AdapterError> {
        let mut lines = Vec::new();

        {
            let mut state = self.state.lock().await;
            let meta = tokio::fs::metadata(&self.config.path).await?;
            let inode = inode_of(&meta);
            let size = meta.len();

            if state.inode != inode || size < state.offset {
                debug!(source_id = %self.id, path = %self.config.path, "log rotated, restarting tail");
                state.offset = 0;
                state.partial.clear();
                state.inode = inode;
            }

            if size > state.offset {
                let mut file = File::open(&self.config.path).await?;
                file.seek(SeekFrom::Start(state.offset)).await?;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await?;

                // Offset where the currently accumulating line began.
                let mut line_start = state.offset - state.partial.len() as u64;
                let mut data = std::mem::take(&mut state.partial);
                data.extend_from_slice(&buf);

                let mut rest: &[u8] = &data;
                while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
                    // Only complete lines are decoded, so a multi-byte or
                    // invalid sequence split across reads stays intact.
                    let decoded = String::from_utf8_lossy(&rest[..pos]);
                    let line = decoded.trim_end_matches('\r');
                    if !line.is_empty() {
                        lines.push((line.to_string(), line_start));
                    }
                    line_start += pos as u64 + 1;
                    rest = &rest[pos + 1..];
                }
                state.partial = rest.to_vec();
                state.offset += buf.len() as u64;
            }

            ctx.cursor
                .store(format!("{}:{}", state.inode.unwrap_or(0), state.offset));
        }

        let mut emitted = 0;
        for (line, offset) in lines {
            let hint = sha256_hex(format!("{line}:{offset}").as_bytes());
            let raw = RawEvent {
                source_id: self.id.clone(),
                source_type: SourceType::LogTail,
                route: self.route.clone(),
                format: self.config.format.clone(),
                bytes: line.into_bytes(),
                dedup_hint: Some(hint),
            };
            // Unparsable lines are counted on the sink and skipped.
            emitted += ctx.sink.submit_raw(raw).await.unwrap_or(0);
        }
        Ok(emitted)
    }
}

#[cfg(unix)]
fn inode_of(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn inode_of(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

#[async_trait]
impl SourceAdapter for LogTailSource {
    fn adapter_id(&self) -> &str {
        &self.id
    }

    fn source_type(&self) -> SourceType {
        SourceType::LogTail
    }

    async fn start(&self, ctx: &AdapterContext) -> Result<(), AdapterError> {
        self.config
            .format
            .validate()
            .map_err(|e| AdapterError::Config(e.to_string()))?;

        let meta = tokio::fs::metadata(&self.config.path)
            .await
            .map_err(|e| AdapterError::Config(format!("cannot tail {}: {e}", self.config.path)))?;
        let inode = inode_of(&meta);

        let mut state = self.state.lock().await;
        state.inode = inode;
        state.partial.clear();

        // Resume from a persisted cursor only if it belongs to the same
        // file; otherwise fall back to the configured start position.
        let resumed = ctx.cursor.load().and_then(|cursor| {
            let (saved_inode, saved_offset) = cursor.split_once(':')?;
            let saved_inode: u64 = saved_inode.parse().ok()?;
            let saved_offset: u64 = saved_offset.parse().ok()?;
            (Some(saved_inode) == inode && saved_offset <= meta.len()).then_some(saved_offset)
        });

        state.offset = match resumed {
            Some(offset) => offset,
            None => match self.config.start_position {
                StartPosition::Beginning => 0,
                StartPosition::End => meta.len(),
            },
        };

        info!(
            source_id = %self.id,
            path = %self.config.path,
            offset = state.offset,
            "tailing log"
        );
        Ok(())
    }

    async fn run(&self, ctx: &AdapterContext) -> Result<(), AdapterError> {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = interval.tick() => {
                    if let Err(e) = self.read_new_lines(ctx).await {
                        ctx.sink.record_poll_error();
                        return Err(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    use tokio::sync::{mpsc, watch};

    use inflow_core::IngestionEvent;
    use inflow_normalize::Normalizer;

    use crate::adapter::CursorCell;
    use crate::sink::{AdapterStats, EventSink};

    fn test_ctx() -> (
        AdapterContext,
        mpsc::Receiver<IngestionEvent>,
        watch::Sender<bool>,
    ) {
        let (tx, rx) = mpsc::channel(32);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = AdapterContext {
            sink: EventSink::new(
                "tail-1",
                tx,
                Arc::new(Normalizer::default()),
                Duration::from_millis(50),
                Arc::new(AdapterStats::default()),
            ),
            cancel: cancel_rx,
            cursor: CursorCell::default(),
        };
        (ctx, rx, cancel_tx)
    }

    fn source(path: &std::path::Path, start: StartPosition) -> LogTailSource {
        LogTailSource::new(
            "tail-1",
            LogTailConfig {
                path: path.display().to_string(),
                start_position: start,
                poll_interval_ms: 10,
                format: PayloadFormat::Plain,
                route: Some("app.log".to_string()),
            },
        )
    }

    #[tokio::test]
    async fn missing_file_fails_start() {
        let source = source(std::path::Path::new("/no/such/file.log"), StartPosition::End);
        let (ctx, _rx, _cancel) = test_ctx();
        assert!(matches!(
            source.start(&ctx).await,
            Err(AdapterError::Config(_))
        ));
    }

    #[tokio::test]
    async fn emits_complete_lines_and_buffers_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"").unwrap();

        let source = source(&path, StartPosition::Beginning);
        let (ctx, mut rx, _cancel) = test_ctx();
        source.start(&ctx).await.unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"line one\nline tw").unwrap();
        file.flush().unwrap();

        assert_eq!(source.read_new_lines(&ctx).await.unwrap(), 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.payload["message"], "line one");
        assert_eq!(event.route, "app.log");

        // Completing the buffered partial line emits it with the rest.
        file.write_all(b"o\nline three\n").unwrap();
        file.flush().unwrap();
        assert_eq!(source.read_new_lines(&ctx).await.unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap().payload["message"], "line two");
        assert_eq!(rx.try_recv().unwrap().payload["message"], "line three");
    }

    #[tokio::test]
    async fn start_at_end_skips_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"old line\n").unwrap();

        let source = source(&path, StartPosition::End);
        let (ctx, mut rx, _cancel) = test_ctx();
        source.start(&ctx).await.unwrap();

        assert_eq!(source.read_new_lines(&ctx).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn truncation_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"first generation\n").unwrap();

        let source = source(&path, StartPosition::End);
        let (ctx, mut rx, _cancel) = test_ctx();
        source.start(&ctx).await.unwrap();

        // Truncate-in-place rotation: size drops below the saved offset.
        std::fs::write(&path, b"fresh line\n").unwrap();
        assert_eq!(source.read_new_lines(&ctx).await.unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap().payload["message"], "fresh line");
    }

    #[tokio::test]
    async fn repeated_lines_get_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"").unwrap();

        let source = source(&path, StartPosition::Beginning);
        let (ctx, mut rx, _cancel) = test_ctx();
        source.start(&ctx).await.unwrap();

        std::fs::write(&path, b"same\nsame\n").unwrap();
        assert_eq!(source.read_new_lines(&ctx).await.unwrap(), 2);

        let a = rx.try_recv().unwrap();
        let b = rx.try_recv().unwrap();
        assert_ne!(a.dedup_key, b.dedup_key);
    }

    #[tokio::test]
    async fn multibyte_sequence_split_across_reads_stays_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"").unwrap();

        let source = source(&path, StartPosition::Beginning);
        let (ctx, mut rx, _cancel) = test_ctx();
        source.start(&ctx).await.unwrap();

        // First read ends inside the two-byte encoding of 'é'.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"caf\xC3").unwrap();
        file.flush().unwrap();
        assert_eq!(source.read_new_lines(&ctx).await.unwrap(), 0);

        file.write_all(b"\xA9 au lait\n").unwrap();
        file.flush().unwrap();
        assert_eq!(source.read_new_lines(&ctx).await.unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap().payload["message"], "café au lait");
    }

    #[tokio::test]
    async fn buffered_invalid_byte_does_not_corrupt_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"").unwrap();

        let source = source(&path, StartPosition::Beginning);
        let (ctx, mut rx, _cancel) = test_ctx();
        source.start(&ctx).await.unwrap();

        // A lone invalid byte with no newline sits in the partial buffer.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"\xFF").unwrap();
        file.flush().unwrap();
        assert_eq!(source.read_new_lines(&ctx).await.unwrap(), 0);

        file.write_all(b"\nnext\n").unwrap();
        file.flush().unwrap();
        assert_eq!(source.read_new_lines(&ctx).await.unwrap(), 2);

        assert_eq!(rx.try_recv().unwrap().payload["message"], "\u{FFFD}");
        assert_eq!(rx.try_recv().unwrap().payload["message"], "next");

        // Cursor tracks file bytes, not decoded characters.
        let inode = inode_of(&std::fs::metadata(&path).unwrap()).unwrap();
        assert_eq!(ctx.cursor.load(), Some(format!("{inode}:7")));
    }

    #[tokio::test]
    async fn cursor_resumes_when_inode_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"already seen\nnew line\n").unwrap();

        let source = source(&path, StartPosition::Beginning);
        let (ctx, mut rx, _cancel) = test_ctx();

        let meta = std::fs::metadata(&path).unwrap();
        let inode = inode_of(&meta).unwrap();
        ctx.cursor.store(format!("{inode}:13"));

        source.start(&ctx).await.unwrap();
        assert_eq!(source.read_new_lines(&ctx).await.unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap().payload["message"], "new line");
    }
}
