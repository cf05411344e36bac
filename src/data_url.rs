//! `data:` URLs, for batch records that embed their image inline.

use std::sync::LazyLock;

use base64::{Engine as _, prelude::BASE64_STANDARD};
use regex::Regex;

use crate::prelude::*;

/// Matches `data:<mime>;base64,<payload>`.
static DATA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:(?P<mime_type>[^;,]+);base64,(?P<data>.+)$")
        .expect("failed to compile regex")
});

/// Convert binary data to a `data:` URL.
pub fn data_url(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64_STANDARD.encode(data))
}

/// Decode a base64 `data:` URL into its MIME type and bytes.
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    let caps = DATA_URL_RE
        .captures(data_url.trim())
        .ok_or_else(|| anyhow!("not a base64 data: URL"))?;
    let mime_type = caps["mime_type"].to_ascii_lowercase();
    let data = BASE64_STANDARD
        .decode(caps["data"].as_bytes())
        .context("invalid base64 in data: URL")?;
    Ok((mime_type, data))
}
