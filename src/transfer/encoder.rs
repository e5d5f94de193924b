//! Multipart encoding of one chunk and its throttled, ordered producer.
//!
//! The whole form body is built in memory so its length is known before the
//! request starts. The transport then pulls it through [`ChunkBody::stream`]
//! in slices of at most [`TICK_SIZE`] bytes. After the last slice the stream
//! stays open until the upload cursor reaches this chunk's index: chunks may
//! overlap on the wire, but the server sees them finish in order.

use std::fmt::Write as _;
use std::io;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream};
use rand::RngCore;
use tokio::sync::watch;
use tracing::trace;

use crate::fs::Chunk;
use crate::progress::ProgressReporter;

/// Largest slice handed to the transport at once (128 KiB).
pub const TICK_SIZE: usize = 128 * 1024;

/// A fully materialised `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    body: Bytes,
    content_type: String,
}

impl EncodedChunk {
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

fn random_boundary() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Encode the form for one chunk: `id`, `name`, `chunk`, `chunks`,
/// `lifetime` and the payload as `file`.
pub fn encode_chunk(
    token: &str,
    file_name: &str,
    chunk: &Chunk,
    lifetime_days: u32,
    payload: &[u8],
) -> EncodedChunk {
    encode_with_boundary(&random_boundary(), token, file_name, chunk, lifetime_days, payload)
}

pub(crate) fn encode_with_boundary(
    boundary: &str,
    token: &str,
    file_name: &str,
    chunk: &Chunk,
    lifetime_days: u32,
    payload: &[u8],
) -> EncodedChunk {
    let fields = [
        ("id", token.to_string()),
        ("name", file_name.to_string()),
        ("chunk", chunk.index.to_string()),
        ("chunks", chunk.total.to_string()),
        ("lifetime", lifetime_days.to_string()),
    ];

    let mut head = String::new();
    for (name, value) in &fields {
        let _ = write!(
            head,
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        );
    }
    let _ = write!(
        head,
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    );
    let tail = format!("\r\n--{boundary}--\r\n");

    let mut body = BytesMut::with_capacity(head.len() + payload.len() + tail.len());
    body.put_slice(head.as_bytes());
    body.put_slice(payload);
    body.put_slice(tail.as_bytes());

    EncodedChunk {
        body: body.freeze(),
        content_type: format!("multipart/form-data; boundary={boundary}"),
    }
}

/// An encoded chunk bound to the upload cursor.
#[derive(Debug, Clone)]
pub struct ChunkBody {
    encoded: EncodedChunk,
    index: usize,
    gate: watch::Receiver<usize>,
    progress: Option<ProgressReporter>,
    /// Number of producers that ran to the end, gate included.
    closed: Arc<watch::Sender<usize>>,
}

impl ChunkBody {
    /// `gate` carries the upload cursor: the number of chunks acknowledged so far.
    pub fn new(encoded: EncodedChunk, index: usize, gate: watch::Receiver<usize>) -> Self {
        Self {
            encoded,
            index,
            gate,
            progress: None,
            closed: Arc::new(watch::channel(0).0),
        }
    }

    pub(crate) fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn content_type(&self) -> &str {
        self.encoded.content_type()
    }

    /// Exact body length, for `Content-Length`.
    pub fn len(&self) -> usize {
        self.encoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    /// Watches how many producers of this body have finished. A request's
    /// reply is due once its producer has finished.
    pub(crate) fn closed(&self) -> watch::Receiver<usize> {
        self.closed.subscribe()
    }

    /// A fresh producer over the body. Every call starts from byte 0.
    ///
    /// Yields slices of at most [`TICK_SIZE`] bytes, then waits for the cursor
    /// to reach this chunk's index before ending.
    pub fn stream(&self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let state = Producer {
            data: self.encoded.body.clone(),
            offset: 0,
            index: self.index,
            gate: self.gate.clone(),
            progress: self.progress.clone(),
            closed: self.closed.clone(),
        };
        stream::unfold(state, |mut state| async move {
            if state.offset < state.data.len() {
                let end = (state.offset + TICK_SIZE).min(state.data.len());
                let slice = state.data.slice(state.offset..end);
                state.offset = end;
                if let Some(progress) = &state.progress {
                    progress.report(end as u64);
                }
                return Some((Ok(slice), state));
            }

            let index = state.index;
            let released = state.gate.wait_for(|&cursor| cursor >= index).await.is_ok();
            trace!("chunk {} body closed (gate released: {})", index, released);
            state.closed.send_modify(|count| *count += 1);
            None
        })
    }
}

struct Producer {
    data: Bytes,
    offset: usize,
    index: usize,
    gate: watch::Receiver<usize>,
    progress: Option<ProgressReporter>,
    closed: Arc<watch::Sender<usize>>,
}
