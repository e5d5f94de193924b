//! Upload coordinator.
//!
//! Chunk 0 is uploaded alone so the server registers the token; the rest go
//! through a pool of `workers` concurrent requests. Bodies are released in
//! index order by the cursor gate in [`ChunkBody`], results are consumed in
//! completion order.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::api::{extract_server, upload_url, ChunkResponse};
use crate::error::{GfileError, Result};
use crate::fs::{copy_range, Chunk, ChunkPlan};
use crate::session::Session;
use crate::size::format_size;
use crate::transfer::context::{new_token, UploadContext};
use crate::transfer::encoder::{encode_chunk, ChunkBody};
use crate::transport::Transport;

/// A finished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Download page URL returned by the server.
    pub url: String,
    pub file_name: String,
    /// Source size in bytes.
    pub size: u64,
    pub chunks: usize,
    /// Upload token the chunks were sent under.
    pub token: String,
}

impl UploadResult {
    /// Two-line finish report: timestamp, name and size, then the URL.
    pub fn summary(&self) -> String {
        format!(
            "Finished at {}, filename: {}, size: {}\n{}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.file_name,
            format_size(self.size),
            self.url
        )
    }
}

/// How an upload ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed(UploadResult),
    /// Stopped by the cancellation token or a progress callback.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadState {
    Init,
    ServerResolved,
    FirstChunkDone,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

struct StateMachine {
    state: UploadState,
    file_name: String,
}

impl StateMachine {
    fn new(file_name: &str) -> Self {
        debug!("upload {}: {:?}", file_name, UploadState::Init);
        Self {
            state: UploadState::Init,
            file_name: file_name.to_string(),
        }
    }

    fn advance(&mut self, next: UploadState) {
        debug!("upload {}: {:?} -> {:?}", self.file_name, self.state, next);
        self.state = next;
    }
}

/// Server answer for one chunk, as seen by the coordinator.
#[derive(Debug)]
struct ChunkReport {
    index: usize,
    response: ChunkResponse,
    body: String,
}

impl<T: Transport> Session<T> {
    /// Upload a file and return its download page URL.
    ///
    /// Returns `Ok(UploadOutcome::Cancelled)` if the session's cancellation
    /// token fires or the progress callback returns `false`.
    ///
    /// # Example
    /// ```no_run
    /// # use gfile::{Session, TransferConfig, UploadOutcome};
    /// # async fn example() -> gfile::Result<()> {
    /// let session = Session::new(TransferConfig::default().with_workers(8))?;
    /// match session.upload("video.mp4").await? {
    ///     UploadOutcome::Completed(result) => println!("{}", result.summary()),
    ///     UploadOutcome::Cancelled => println!("cancelled"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn upload(&self, path: impl AsRef<Path>) -> Result<UploadOutcome> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| GfileError::SourceNotFound(path.to_path_buf()))?;
        let mut machine = StateMachine::new(&file_name);

        let size = source_size(path).await?;
        let plan = ChunkPlan::new(size, self.config().chunk_size)?;
        info!(
            "Filesize {}, chunk size: {}, total chunks: {}",
            format_size(size),
            format_size(plan.chunk_size()),
            plan.count()
        );

        let cancel = self.cancelled().clone();
        if cancel.is_cancelled() {
            machine.advance(UploadState::Cancelled);
            return Ok(UploadOutcome::Cancelled);
        }

        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                machine.advance(UploadState::Cancelled);
                return Ok(UploadOutcome::Cancelled);
            }
            page = self.transport().get_text(&self.config().service_root) => page?,
        };
        let server = extract_server(&page)?;
        debug!("upload server: {}", server);
        machine.advance(UploadState::ServerResolved);

        let ctx = UploadContext::new(
            new_token(),
            upload_url(&server),
            file_name.clone(),
            path.to_path_buf(),
            plan,
            self.config().lifetime_days,
            self.config().chunk_copy_size,
        );
        let mut last_url: Option<String> = None;

        // Chunk 0 registers the token; nothing else may start before it.
        let Some(first) = ctx.plan.chunk(0) else {
            return Err(GfileError::EmptySource(path.to_path_buf()));
        };
        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                machine.advance(UploadState::Cancelled);
                return Ok(UploadOutcome::Cancelled);
            }
            report = self.upload_chunk(&ctx, first) => report,
        };
        match report.and_then(|report| accept(&ctx, report, &mut last_url)) {
            Ok(()) => machine.advance(UploadState::FirstChunkDone),
            Err(e) => {
                machine.advance(UploadState::Failed);
                return Err(e);
            }
        }

        machine.advance(UploadState::Uploading);
        let mut pool = stream::iter(ctx.plan.chunks().skip(1))
            .map(|chunk| self.upload_chunk(&ctx, chunk))
            .buffer_unordered(self.workers());

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    machine.advance(UploadState::Cancelled);
                    return Ok(UploadOutcome::Cancelled);
                }
                next = pool.next() => next,
            };
            let Some(report) = next else { break };
            if let Err(e) = report.and_then(|report| accept(&ctx, report, &mut last_url)) {
                ctx.fail();
                machine.advance(UploadState::Failed);
                return Err(e);
            }
        }

        let Some(url) = last_url else {
            machine.advance(UploadState::Failed);
            return Err(GfileError::MissingDownloadUrl);
        };
        machine.advance(UploadState::Completed);

        Ok(UploadOutcome::Completed(UploadResult {
            url,
            file_name,
            size,
            chunks: ctx.plan.count(),
            token: ctx.token.clone(),
        }))
    }

    /// Read, encode and send one chunk. `Ok(None)` means it was skipped
    /// because the upload already failed.
    async fn upload_chunk(&self, ctx: &UploadContext, chunk: Chunk) -> Result<Option<ChunkReport>> {
        if ctx.is_failed() || self.cancelled().is_cancelled() {
            debug!("skipping {} at cursor {}", chunk.label(), ctx.cursor());
            return Ok(None);
        }

        let payload = read_chunk(ctx.source.clone(), &chunk, ctx.chunk_copy_size).await?;
        let encoded = encode_chunk(&ctx.token, &ctx.file_name, &chunk, ctx.lifetime_days, &payload);
        drop(payload);

        let mut body = ChunkBody::new(encoded, chunk.index, ctx.subscribe());
        if let Some(reporter) = self.reporter(body.len() as u64, chunk.label()) {
            body = body.with_progress(reporter);
        }

        debug!("sending {} ({} bytes)", chunk.label(), body.len());
        let text = if chunk.index == 0 {
            // Only transport retries apply to the chunk that registers the token.
            self.post_once(&ctx.upload_url, &body).await?
        } else {
            self.post_with_retry(&ctx.upload_url, &body, &chunk).await?
        };
        // A reply may arrive while the body is still held at the gate.
        ctx.wait_turn(chunk.index).await;
        let cursor = ctx.advance();
        debug!("{} acknowledged, cursor {}", chunk.label(), cursor);

        Ok(Some(ChunkReport {
            index: chunk.index,
            response: ChunkResponse::parse(&text),
            body: text,
        }))
    }

    async fn post_with_retry(&self, url: &str, body: &ChunkBody, chunk: &Chunk) -> Result<String> {
        let policy = &self.config().chunk_retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.post_once(url, body).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => {
                    if !policy.allows(attempt) {
                        return Err(GfileError::RetriesExhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    let delay = policy.delay(attempt);
                    warn!(
                        "{} failed (attempt {}): {}. Retrying in {:?}",
                        chunk.label(),
                        attempt,
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One POST attempt. Its reply is due within the configured timeout
    /// once the transport has drained the body.
    async fn post_once(&self, url: &str, body: &ChunkBody) -> Result<String> {
        let timeout = self.config().timeout;
        let mut closed = body.closed();
        let finished = *closed.borrow_and_update();
        let overdue = async move {
            let _ = closed.wait_for(|&count| count > finished).await;
            sleep(timeout).await;
        };
        tokio::select! {
            reply = self.transport().post_chunk(url, body) => reply,
            _ = overdue => Err(GfileError::Timeout(timeout)),
        }
    }
}

/// Fold one chunk report into the upload: remember its URL or turn a
/// server verdict into an error.
fn accept(ctx: &UploadContext, report: Option<ChunkReport>, last_url: &mut Option<String>) -> Result<()> {
    let Some(report) = report else {
        return Ok(());
    };
    match report.response {
        ChunkResponse::Success { url } => {
            if let Some(url) = url {
                *last_url = Some(url);
            }
            Ok(())
        }
        ChunkResponse::Rejected { reason } => {
            ctx.fail();
            Err(GfileError::Rejected {
                chunk: report.index,
                reason,
            })
        }
        ChunkResponse::Malformed => {
            ctx.fail();
            Err(GfileError::MalformedResponse {
                chunk: report.index,
                body: report.body,
            })
        }
    }
}

async fn source_size(path: &Path) -> Result<u64> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(GfileError::SourceNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(GfileError::SourceNotFound(path.to_path_buf()));
    }
    if metadata.len() == 0 {
        return Err(GfileError::EmptySource(path.to_path_buf()));
    }
    Ok(metadata.len())
}

/// Read one chunk on the blocking pool with its own file handle.
async fn read_chunk(source: PathBuf, chunk: &Chunk, copy_size: u64) -> Result<Vec<u8>> {
    let (offset, len) = (chunk.offset, chunk.len);
    tokio::task::spawn_blocking(move || {
        let mut payload = Vec::with_capacity(len as usize);
        let copied = copy_range(&source, &mut payload, len, offset, copy_size)?;
        if copied != len {
            return Err(GfileError::SizeMismatch {
                copied,
                expected: len,
            });
        }
        Ok(payload)
    })
    .await
    .map_err(|e| GfileError::Custom(format!("Chunk reader failed: {}", e)))?
}
