//! Input acquisition: Google Sheets share links, local files and uploads.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::TimelineError;

const SHEETS_HOST: &str = "docs.google.com";

/// A spreadsheet addressed by a share link.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SheetRef {
    pub id: String,
    /// Worksheet tab; the export defaults to the first tab when absent.
    pub gid: Option<String>,
}

/// Where the CSV bytes come from.
#[derive(Clone, Debug)]
pub enum InputSource {
    SheetUrl(String),
    File(PathBuf),
    Bytes { name: String, bytes: Vec<u8> },
}

impl InputSource {
    /// Treat `http(s)://` arguments as sheet links and anything else as a path.
    pub fn classify(arg: &str) -> Self {
        let trimmed = arg.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("https://") || lower.starts_with("http://") {
            InputSource::SheetUrl(trimmed.to_string())
        } else {
            InputSource::File(PathBuf::from(trimmed))
        }
    }

    pub fn describe(&self) -> String {
        match self {
            InputSource::SheetUrl(url) => url.clone(),
            InputSource::File(path) => path.display().to_string(),
            InputSource::Bytes { name, .. } => name.clone(),
        }
    }

    pub fn load(&self) -> Result<Vec<u8>, TimelineError> {
        match self {
            InputSource::SheetUrl(url) => {
                let sheet = parse_sheet_url(url)?;
                let export = export_csv_url(&sheet);
                tracing::debug!(%export, "resolved sheet export URL");
                fetch_csv(&export)
            }
            InputSource::File(path) => Ok(fs::read(path)?),
            InputSource::Bytes { bytes, .. } => Ok(bytes.clone()),
        }
    }
}

/// Extract the spreadsheet id (and tab, if any) from a share link.
pub fn parse_sheet_url(url: &str) -> Result<SheetRef, TimelineError> {
    let invalid = || TimelineError::InvalidSheetUrl(url.to_string());
    let trimmed = url.trim();
    let rest = strip_scheme(trimmed).ok_or_else(invalid)?;

    let (rest, fragment) = match rest.split_once('#') {
        Some((head, frag)) => (head, Some(frag)),
        None => (rest, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((head, q)) => (head, Some(q)),
        None => (rest, None),
    };

    let mut segments = path.split('/');
    let host = segments.next().unwrap_or_default();
    if !host.eq_ignore_ascii_case(SHEETS_HOST) {
        return Err(invalid());
    }
    let segments: Vec<&str> = segments.collect();
    // Links look like /spreadsheets/d/<id>/edit or /spreadsheets/u/0/d/<id>/...
    let d_pos = segments
        .iter()
        .position(|s| *s == "d")
        .filter(|&pos| segments[..pos].contains(&"spreadsheets"))
        .ok_or_else(invalid)?;
    let id = segments
        .get(d_pos + 1)
        .copied()
        .filter(|id| !id.is_empty() && id.chars().all(is_id_char))
        .ok_or_else(invalid)?;

    let gid = query
        .and_then(|q| param_value(q, "gid"))
        .or_else(|| fragment.and_then(|f| param_value(f, "gid")))
        .filter(|gid| gid.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string);

    Ok(SheetRef {
        id: id.to_string(),
        gid,
    })
}

pub fn export_csv_url(sheet: &SheetRef) -> String {
    let mut url = format!(
        "https://{}/spreadsheets/d/{}/export?format=csv",
        SHEETS_HOST, sheet.id
    );
    if let Some(gid) = sheet.gid.as_ref() {
        url.push_str("&gid=");
        url.push_str(gid);
    }
    url
}

/// Reject bodies that are clearly not CSV; Google serves an HTML sign-in page
/// for sheets that are not shared publicly.
pub fn ensure_csv_body(body: &[u8]) -> Result<(), TimelineError> {
    let first = body.iter().find(|b| !b.is_ascii_whitespace());
    match first {
        Some(b'<') => Err(TimelineError::Fetch(
            "sheet is not shared publicly (received an HTML page instead of CSV)".into(),
        )),
        None => Err(TimelineError::Fetch("sheet export was empty".into())),
        Some(_) => Ok(()),
    }
}

#[cfg(feature = "fetch")]
pub fn fetch_csv(url: &str) -> Result<Vec<u8>, TimelineError> {
    use std::io::Read;
    use std::time::Duration;

    const MAX_EXPORT_BYTES: u64 = 64 * 1024 * 1024;

    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(30))
        .build();
    let response = agent
        .get(url)
        .call()
        .map_err(|e| TimelineError::Fetch(e.to_string()))?;
    let mut body = Vec::new();
    response
        .into_reader()
        .take(MAX_EXPORT_BYTES)
        .read_to_end(&mut body)?;
    ensure_csv_body(&body)?;
    Ok(body)
}

#[cfg(not(feature = "fetch"))]
pub fn fetch_csv(url: &str) -> Result<Vec<u8>, TimelineError> {
    Err(TimelineError::Fetch(format!(
        "built without network support; download {url} and pass the file instead"
    )))
}

fn strip_scheme(url: &str) -> Option<&str> {
    ["https://", "http://"].into_iter().find_map(|scheme| {
        let head = url.get(..scheme.len())?;
        head.eq_ignore_ascii_case(scheme)
            .then(|| &url[scheme.len()..])
    })
}

fn param_value<'a>(params: &'a str, key: &str) -> Option<&'a str> {
    params.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key && !v.is_empty()).then_some(v)
    })
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}
