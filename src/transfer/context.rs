//! Runtime state of one upload, shared by its workers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::RngCore;
use tokio::sync::watch;

use crate::fs::ChunkPlan;

/// Fresh upload token: 32 lowercase hex characters.
pub(crate) fn new_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Everything a chunk worker needs, created per `upload()` call.
#[derive(Debug)]
pub(crate) struct UploadContext {
    pub(crate) token: String,
    pub(crate) upload_url: String,
    pub(crate) file_name: String,
    pub(crate) source: PathBuf,
    pub(crate) plan: ChunkPlan,
    pub(crate) lifetime_days: u32,
    pub(crate) chunk_copy_size: u64,
    /// Number of chunks acknowledged so far.
    cursor: watch::Sender<usize>,
    failed: AtomicBool,
}

impl UploadContext {
    pub(crate) fn new(
        token: String,
        upload_url: String,
        file_name: String,
        source: PathBuf,
        plan: ChunkPlan,
        lifetime_days: u32,
        chunk_copy_size: u64,
    ) -> Self {
        let (cursor, _) = watch::channel(0usize);
        Self {
            token,
            upload_url,
            file_name,
            source,
            plan,
            lifetime_days,
            chunk_copy_size,
            cursor,
            failed: AtomicBool::new(false),
        }
    }

    /// Receiver used by chunk bodies to wait for their turn.
    pub(crate) fn subscribe(&self) -> watch::Receiver<usize> {
        self.cursor.subscribe()
    }

    pub(crate) fn cursor(&self) -> usize {
        *self.cursor.borrow()
    }

    /// Acknowledge one more chunk and wake every waiting body.
    pub(crate) fn advance(&self) -> usize {
        let mut now = 0;
        self.cursor.send_modify(|cursor| {
            *cursor += 1;
            now = *cursor;
        });
        now
    }

    /// Wait until every chunk before `index` has been acknowledged.
    pub(crate) async fn wait_turn(&self, index: usize) {
        let mut gate = self.subscribe();
        // The sender lives in `self`, so the wait cannot fail.
        let _ = gate.wait_for(|&cursor| cursor >= index).await;
    }

    pub(crate) fn fail(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}
