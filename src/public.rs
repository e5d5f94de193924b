//! Share links and landing pages.
//!
//! A share link (`https://46.gigafile.nu/0123-abcd`) points at an HTML
//! landing page. Visiting it sets the session cookie the download handler
//! requires; scraping it yields the file id, name and displayed size.
//!
//! Two page shapes exist: a single-file page (`#dl`, `.dl_size`) and a bundle
//! page (`#contents_matomete`) listing several files. Only the first file of
//! a bundle is extracted.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GfileError, Result};
use crate::session::Session;
use crate::size::parse_size;
use crate::transport::Transport;

static SHARE_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://\d+?\.gigafile\.nu/([a-z0-9-]+)$").expect("share link pattern is valid")
});
static BUNDLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bid\s*=\s*["']contents_matomete["']"#).expect("bundle pattern is valid")
});
static BUNDLE_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bclass\s*=\s*["'][^"']*\bmatomete_file\b[^"']*["']"#)
        .expect("bundle file pattern is valid")
});
static BUNDLE_INFO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<([a-zA-Z0-9]+)[^>]*\bclass\s*=\s*["'][^"']*\bmatomete_file_info\b[^"']*["'][^>]*>"#)
        .expect("bundle info pattern is valid")
});
static BUNDLE_BUTTON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<[a-zA-Z0-9]+[^>]*\bclass\s*=\s*["'][^"']*\bdownload_panel_btn_dl\b[^"']*["'][^>]*>"#)
        .expect("download button pattern is valid")
});
static ONCLICK_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"download\(\d+, *'(.+?)'").expect("onclick pattern is valid"));
static SPAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<span[^>]*>(.*?)</span>").expect("span pattern is valid"));
static FULLWIDTH_PAREN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"（(.+?)）").expect("paren pattern is valid"));
static SINGLE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<([a-zA-Z0-9]+)[^>]*\bid\s*=\s*["']dl["'][^>]*>"#).expect("name pattern is valid")
});
static SINGLE_SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<([a-zA-Z0-9]+)[^>]*\bclass\s*=\s*["'][^"']*\bdl_size\b[^"']*["'][^>]*>"#)
        .expect("size pattern is valid")
});
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));
static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]+|#\d+|[a-zA-Z]+);").expect("entity pattern is valid")
});

/// A validated share link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    pub url: String,
    /// Last path segment of the link.
    pub id: String,
}

/// Validate a share link and extract its id.
///
/// # Example
/// ```
/// use gfile::public::parse_share_link;
///
/// let link = parse_share_link("https://46.gigafile.nu/0123-abcd").unwrap();
/// assert_eq!(link.id, "0123-abcd");
/// assert!(parse_share_link("https://example.com/0123").is_err());
/// ```
pub fn parse_share_link(url: &str) -> Result<ShareLink> {
    let url = url.trim();
    let caps = SHARE_LINK_RE
        .captures(url)
        .ok_or_else(|| GfileError::InvalidUrl(url.to_string()))?;
    Ok(ShareLink {
        url: url.to_string(),
        id: caps[1].to_string(),
    })
}

/// What a landing page says about its file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFile {
    /// File id for `download.php?file=`.
    pub id: String,
    /// Name shown on the page, not sanitised.
    pub name: String,
    /// Size as displayed, e.g. `"1.5 MB"`.
    pub size_text: String,
    /// `size_text` in bytes, when it parses.
    pub size: Option<u64>,
    /// Number of files on a bundle page, `None` for a single-file page.
    pub bundle_files: Option<usize>,
}

impl ResolvedFile {
    pub fn is_bundle(&self) -> bool {
        self.bundle_files.is_some()
    }
}

/// Scrape a landing page.
pub fn parse_landing_page(html: &str, link: &ShareLink) -> Result<ResolvedFile> {
    let (id, name, size_text, bundle_files) = if BUNDLE_RE.is_match(html) {
        let (id, name, size_text, files) = parse_bundle(html)?;
        (id, name, size_text, Some(files))
    } else {
        let name = element_text(html, &SINGLE_NAME_RE)
            .ok_or_else(|| GfileError::PageParse("missing file name (#dl)".to_string()))?;
        let size_text = element_text(html, &SINGLE_SIZE_RE)
            .ok_or_else(|| GfileError::PageParse("missing file size (.dl_size)".to_string()))?;
        (link.id.clone(), name, size_text, None)
    };

    let size = parse_size(size_text.as_str()).ok();
    if size.is_none() {
        debug!("unparsed size text {:?}", size_text);
    }
    Ok(ResolvedFile {
        id,
        name,
        size_text,
        size,
        bundle_files,
    })
}

fn parse_bundle(html: &str) -> Result<(String, String, String, usize)> {
    let files: Vec<usize> = BUNDLE_FILE_RE.find_iter(html).map(|m| m.start()).collect();
    let Some(&start) = files.first() else {
        return Err(GfileError::PageParse("bundle page lists no files".to_string()));
    };
    let end = files.get(1).copied().unwrap_or(html.len());
    let entry = &html[start..end];

    let info = element_inner(entry, &BUNDLE_INFO_RE)
        .ok_or_else(|| GfileError::PageParse("missing .matomete_file_info".to_string()))?;
    let spans: Vec<&str> = SPAN_RE
        .captures_iter(info)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    let name = spans
        .get(1)
        .map(|span| text_content(span))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| GfileError::PageParse("missing bundle file name".to_string()))?;
    let size_text = spans
        .get(2)
        .map(|span| text_content(span))
        .and_then(|text| FULLWIDTH_PAREN_RE.captures(&text).map(|caps| caps[1].trim().to_string()))
        .ok_or_else(|| GfileError::PageParse("missing bundle file size".to_string()))?;

    let id = BUNDLE_BUTTON_RE
        .find(entry)
        .and_then(|button| ONCLICK_ID_RE.captures(button.as_str()))
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| GfileError::PageParse("missing bundle download handler".to_string()))?;

    Ok((id, name, size_text, files.len()))
}

/// Inner HTML of the first element whose opening tag matches `opener`
/// (group 1 must capture the tag name). Nested elements of the same tag are
/// not balanced.
fn element_inner<'a>(html: &'a str, opener: &Regex) -> Option<&'a str> {
    let caps = opener.captures(html)?;
    let open = caps.get(0)?;
    let tag = caps.get(1)?.as_str().to_ascii_lowercase();
    let rest = &html[open.end()..];
    let close = rest.to_ascii_lowercase().find(&format!("</{}", tag))?;
    Some(&rest[..close])
}

fn element_text(html: &str, opener: &Regex) -> Option<String> {
    element_inner(html, opener).map(text_content)
}

/// Strip tags, decode entities, trim.
fn text_content(html: &str) -> String {
    let stripped = TAG_RE.replace_all(html, "");
    decode_entities(&stripped).trim().to_string()
}

fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}

impl<T: Transport> Session<T> {
    /// Fetch a share link's landing page and describe its file.
    ///
    /// Fetching the page also stores the cookie the download needs.
    pub async fn resolve(&self, share_url: &str) -> Result<ResolvedFile> {
        let link = parse_share_link(share_url)?;
        self.resolve_link(&link).await
    }

    pub(crate) async fn resolve_link(&self, link: &ShareLink) -> Result<ResolvedFile> {
        let html = self.transport().get_text(&link.url).await?;
        let resolved = parse_landing_page(&html, link)?;
        if let Some(files) = resolved.bundle_files {
            if files > 1 {
                warn!("bundle page with {} files; only the first is described", files);
            }
        }
        Ok(resolved)
    }
}
