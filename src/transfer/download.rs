//! Download streamer.
//!
//! The landing page is fetched first so the session holds the cookie the
//! download handler checks. The file then either streams into `<name>.dl`
//! and is renamed once its size matches `Content-Length`, or is handed to an
//! external accelerator together with the cookie.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::api::download_url;
use crate::config::DelegateConfig;
use crate::error::{GfileError, Result};
use crate::progress::short_label;
use crate::public::{parse_share_link, ResolvedFile};
use crate::session::Session;
use crate::transport::Transport;

static UNSAFE_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/:*?"<>|]"#).expect("filename pattern is valid"));

/// How a download ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file is complete at this path.
    Completed(PathBuf),
    /// An external accelerator ran; its exit code, if it exited normally.
    Delegated { exit_code: Option<i32> },
    Cancelled,
}

/// Replace characters that are invalid in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    UNSAFE_CHARS_RE.replace_all(name, "_").into_owned()
}

/// Program and arguments for a delegated download:
/// `<url> --header "Cookie: <cookie>" -o <output> <extra args...>`.
pub fn delegate_command(
    delegate: &DelegateConfig,
    url: &str,
    cookie: &str,
    output: &Path,
) -> (String, Vec<String>) {
    let mut args = vec![
        url.to_string(),
        "--header".to_string(),
        format!("Cookie: {}", cookie),
        "-o".to_string(),
        output.to_string_lossy().into_owned(),
    ];
    args.extend(delegate.extra_args.iter().cloned());
    (delegate.program.clone(), args)
}

fn temp_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".dl");
    PathBuf::from(name)
}

/// Declared page size and received length disagree by more than 1%.
fn sizes_disagree(declared: u64, received: u64) -> bool {
    declared.abs_diff(received) as f64 > declared as f64 * 0.01
}

impl<T: Transport> Session<T> {
    /// Download the file behind a share link.
    ///
    /// `filename` overrides the name shown on the page; otherwise the page's
    /// name is used after [`sanitize_filename`].
    ///
    /// # Example
    /// ```no_run
    /// # use gfile::{DownloadOutcome, Session, TransferConfig};
    /// # async fn example() -> gfile::Result<()> {
    /// let session = Session::new(TransferConfig::default())?;
    /// if let DownloadOutcome::Completed(path) =
    ///     session.download("https://46.gigafile.nu/0123-abcd", None).await?
    /// {
    ///     println!("saved to {}", path.display());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn download(&self, share_url: &str, filename: Option<&Path>) -> Result<DownloadOutcome> {
        let link = parse_share_link(share_url)?;
        if self.cancelled().is_cancelled() {
            return Ok(DownloadOutcome::Cancelled);
        }

        let resolved: Option<ResolvedFile> = match self.resolve_link(&link).await {
            Ok(resolved) => Some(resolved),
            Err(GfileError::PageParse(reason)) => {
                warn!("Failed to parse the page {}: {}", link.url, reason);
                warn!("Please report it upstream; continuing with the id from the link");
                if filename.is_none() {
                    return Err(GfileError::PageParse(reason));
                }
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(resolved) = &resolved {
            if let Some(files) = resolved.bundle_files.filter(|&files| files > 1) {
                return Err(GfileError::BundleUnsupported { files });
            }
            info!(
                "Name: {}, size: {}, id: {}",
                resolved.name, resolved.size_text, resolved.id
            );
        }

        let output = match (filename, &resolved) {
            (Some(filename), _) => filename.to_path_buf(),
            (None, Some(resolved)) => PathBuf::from(sanitize_filename(&resolved.name)),
            (None, None) => return Err(GfileError::PageParse("no file name".to_string())),
        };
        let id = resolved.as_ref().map_or(link.id.as_str(), |r| r.id.as_str());
        let url = download_url(&link.url, id, self.config().password.as_deref())?;
        debug!("download url: {}", url);

        match &self.config().delegate {
            Some(delegate) => self.download_delegated(delegate, &url, &output).await,
            None => {
                let declared = resolved.as_ref().and_then(|r| r.size);
                self.download_direct(&url, &output, declared).await
            }
        }
    }

    async fn download_delegated(
        &self,
        delegate: &DelegateConfig,
        url: &str,
        output: &Path,
    ) -> Result<DownloadOutcome> {
        let cookie = self.transport().cookie_header(url).unwrap_or_default();
        let (program, args) = delegate_command(delegate, url, &cookie, output);
        debug!("running {} {:?}", program, args);

        let mut child = Command::new(&program)
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GfileError::Delegate(format!("{}: {}", program, e)))?;

        let status = tokio::select! {
            biased;
            _ = self.cancelled().cancelled() => return Ok(DownloadOutcome::Cancelled),
            status = child.wait() => status?,
        };
        if !status.success() {
            warn!("{} exited with {}", program, status);
        }
        Ok(DownloadOutcome::Delegated {
            exit_code: status.code(),
        })
    }

    async fn download_direct(&self, url: &str, output: &Path, declared: Option<u64>) -> Result<DownloadOutcome> {
        let cancel = self.cancelled().clone();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(DownloadOutcome::Cancelled),
            body = self.transport().get_stream(url) => body?,
        };
        let expected = body.content_length.ok_or(GfileError::MissingContentLength)?;
        if let Some(declared) = declared {
            if sizes_disagree(declared, expected) {
                warn!(
                    "page declares about {} bytes but the server sends {}",
                    declared, expected
                );
            }
        }

        let label = output
            .file_name()
            .map(|name| short_label(&name.to_string_lossy()))
            .unwrap_or_default();
        let reporter = self.reporter(expected, label);

        let temp = temp_path(output);
        let file = tokio::fs::File::create(&temp).await?;
        let mut writer = BufWriter::with_capacity(self.config().chunk_copy_size as usize, file);
        let mut stream = body.stream;
        let mut received = 0u64;
        let idle = self.config().timeout;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    writer.flush().await?;
                    debug!("download cancelled, partial file kept at {}", temp.display());
                    return Ok(DownloadOutcome::Cancelled);
                }
                next = timeout(idle, stream.next()) => next,
            };
            let Ok(next) = next else {
                writer.flush().await?;
                warn!("no data for {:?}, partial file kept at {}", idle, temp.display());
                return Err(GfileError::Timeout(idle));
            };
            let Some(bytes) = next else { break };
            let bytes = bytes?;
            writer.write_all(&bytes).await?;
            received += bytes.len() as u64;
            if let Some(reporter) = &reporter {
                reporter.report(received);
            }
        }
        writer.shutdown().await?;
        drop(writer);

        let actual = tokio::fs::metadata(&temp).await?.len();
        info!("Filesize check: expected: {}; actual: {}", expected, actual);
        if actual != expected {
            warn!(
                "Downloaded file is corrupt. Please check the broken file at {} and delete it yourself if needed.",
                temp.display()
            );
            return Err(GfileError::Integrity {
                expected,
                actual,
                temp_path: temp,
            });
        }

        tokio::fs::rename(&temp, output).await?;
        Ok(DownloadOutcome::Completed(output.to_path_buf()))
    }
}
