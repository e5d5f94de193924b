//! Simulated gigafile.nu for integration tests.
//!
//! [`MockTransport`] answers the service root with a server assignment,
//! serves landing pages and download bodies from maps, and hands every chunk
//! POST to a test-supplied handler after draining the chunk body (which is
//! where the ordering gate holds a request open). With early replies it
//! answers as soon as all body bytes arrived, the way an HTTP server that
//! has read `Content-Length` bytes does, and leaves the gate to drain in the
//! background.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use tempfile::NamedTempFile;

use gfile::transfer::ChunkBody;
use gfile::{DownloadBody, GfileError, Result, Transport};

pub const SERVICE_PAGE: &str = r#"<html><script>var server = "46.gigafile.nu";</script></html>"#;
pub const UPLOAD_URL: &str = "https://46.gigafile.nu/upload_chunk.php";

/// What the simulated server does with one chunk attempt.
pub enum Reply {
    Json(String),
    /// Fail at the transport level.
    Error(GfileError),
    /// Never answer.
    Hang,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Json(r#"{"status":0}"#.to_string())
    }

    pub fn url(url: &str) -> Self {
        Reply::Json(format!(r#"{{"status":0,"url":"{}"}}"#, url))
    }
}

/// One chunk attempt as seen by the server.
#[derive(Debug, Clone)]
pub struct ChunkCall {
    pub index: usize,
    /// 1-based attempt number for this index.
    pub attempt: u32,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// POST started.
    Started(usize),
    /// Body stream ended (the gate released it).
    Sent(usize),
    /// Response returned to the client.
    Replied(usize),
}

type Handler = Arc<dyn Fn(&ChunkCall) -> Reply + Send + Sync>;

pub struct MockTransport {
    pub service_page: String,
    pub pages: HashMap<String, String>,
    /// Download URL → (Content-Length header, body).
    pub downloads: HashMap<String, (Option<u64>, Vec<u8>)>,
    /// Download URLs whose body stops after its bytes without ending.
    pub stalled: HashSet<String>,
    pub cookie: Option<String>,
    /// Random delay before each chunk body is drained.
    pub max_latency: Duration,
    /// Reply once every body byte arrived instead of when the body ends.
    pub early_reply: bool,
    handler: Handler,
    attempts: Mutex<HashMap<usize, u32>>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&ChunkCall) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            service_page: SERVICE_PAGE.to_string(),
            pages: HashMap::new(),
            downloads: HashMap::new(),
            stalled: HashSet::new(),
            cookie: None,
            max_latency: Duration::ZERO,
            early_reply: false,
            handler: Arc::new(handler),
            attempts: Mutex::new(HashMap::new()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every chunk succeeds; the last one carries `url`.
    pub fn accepting(url: &'static str) -> Self {
        Self::new(move |call| {
            let total = chunk_total(&call.body);
            if call.index + 1 == total {
                Reply::url(url)
            } else {
                Reply::ok()
            }
        })
    }

    pub fn with_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = max_latency;
        self
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn with_download(mut self, url: &str, content_length: Option<u64>, body: Vec<u8>) -> Self {
        self.downloads.insert(url.to_string(), (content_length, body));
        self
    }

    pub fn with_early_reply(mut self) -> Self {
        self.early_reply = true;
        self
    }

    pub fn with_stalled_download(mut self, url: &str, content_length: Option<u64>, body: Vec<u8>) -> Self {
        self.stalled.insert(url.to_string());
        self.with_download(url, content_length, body)
    }

    pub fn with_cookie(mut self, cookie: &str) -> Self {
        self.cookie = Some(cookie.to_string());
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn next_attempt(&self, index: usize) -> u32 {
        let mut attempts = self.attempts.lock().unwrap();
        let attempt = attempts.entry(index).or_insert(0);
        *attempt += 1;
        *attempt
    }
}

impl Transport for MockTransport {
    async fn get_text(&self, url: &str) -> Result<String> {
        if url == "https://gigafile.nu/" {
            return Ok(self.service_page.clone());
        }
        self.pages.get(url).cloned().ok_or(GfileError::HttpError(404))
    }

    async fn post_chunk(&self, url: &str, body: &ChunkBody) -> Result<String> {
        assert_eq!(url, UPLOAD_URL);
        let index = body.index();
        let attempt = self.next_attempt(index);
        self.record(Event::Started(index));

        if !self.max_latency.is_zero() {
            let millis = rand::thread_rng().gen_range(0..=self.max_latency.as_millis() as u64);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        let mut sent = Vec::with_capacity(body.len());
        let mut stream = Box::pin(body.stream());
        while sent.len() < body.len() {
            match stream.next().await {
                Some(slice) => sent.extend_from_slice(&slice?),
                None => break,
            }
        }
        assert_eq!(sent.len(), body.len());
        if self.early_reply {
            let events = self.events.clone();
            tokio::spawn(async move {
                while stream.next().await.is_some() {}
                events.lock().unwrap().push(Event::Sent(index));
            });
        } else {
            while stream.next().await.is_some() {}
            self.record(Event::Sent(index));
        }

        let call = ChunkCall {
            index,
            attempt,
            body: Bytes::from(sent),
        };
        match (self.handler)(&call) {
            Reply::Json(json) => {
                self.record(Event::Replied(index));
                Ok(json)
            }
            Reply::Error(e) => Err(e),
            Reply::Hang => futures::future::pending().await,
        }
    }

    async fn get_stream(&self, url: &str) -> Result<DownloadBody> {
        let (content_length, body) = self.downloads.get(url).cloned().ok_or(GfileError::HttpError(404))?;
        let pieces: Vec<Result<Bytes>> = body
            .chunks(64 * 1024)
            .map(|piece| Ok(Bytes::copy_from_slice(piece)))
            .collect();
        let stream = futures::stream::iter(pieces);
        let stream = if self.stalled.contains(url) {
            stream.chain(futures::stream::pending()).boxed()
        } else {
            stream.boxed()
        };
        Ok(DownloadBody {
            content_length,
            stream,
        })
    }

    fn cookie_header(&self, _url: &str) -> Option<String> {
        self.cookie.clone()
    }
}

/// Value of a text field in a multipart chunk body.
pub fn form_field(body: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let marker = format!("name=\"{}\"\r\n\r\n", name);
    let start = text.find(&marker)? + marker.len();
    let end = text[start..].find("\r\n")? + start;
    Some(text[start..end].to_string())
}

fn chunk_total(body: &[u8]) -> usize {
    form_field(body, "chunks")
        .and_then(|total| total.parse().ok())
        .unwrap_or(0)
}

/// A temp file of `len` patterned bytes.
pub fn source_file(len: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    file
}
