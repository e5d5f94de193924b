//! Endpoint URLs and the upload server assignment.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

use crate::error::{GfileError, Result};

/// Path of the chunk upload handler on the assigned server.
pub const UPLOAD_ENDPOINT: &str = "upload_chunk.php";

static SERVER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"var server = "(.+?)""#).expect("server pattern is valid"));

/// Extract the upload host from the service entry page.
pub fn extract_server(page: &str) -> Result<String> {
    SERVER_RE
        .captures(page)
        .map(|caps| caps[1].to_string())
        .ok_or(GfileError::ServerResolutionFailed)
}

/// Chunk upload URL on `server`.
pub fn upload_url(server: &str) -> String {
    format!("https://{}/{}", server, UPLOAD_ENDPOINT)
}

/// Direct download URL for file `id` shared at `share_url`.
///
/// The download handler lives next to the landing page:
/// `https://46.gigafile.nu/0123-abc` → `https://46.gigafile.nu/download.php?file=<id>`.
pub fn download_url(share_url: &str, id: &str, password: Option<&str>) -> Result<String> {
    let origin = share_url
        .rsplit_once('/')
        .map(|(origin, _)| origin)
        .ok_or_else(|| GfileError::InvalidUrl(share_url.to_string()))?;
    let mut url = Url::parse(&format!("{}/download.php", origin))
        .map_err(|_| GfileError::InvalidUrl(share_url.to_string()))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("file", id);
        if let Some(password) = password {
            query.append_pair("dlkey", password);
        }
    }
    Ok(url.to_string())
}
