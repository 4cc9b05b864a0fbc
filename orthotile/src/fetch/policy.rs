//! Recognising "no tile here" responses and server error payloads.

use super::http::HttpResponse;

/// Longest plain-text body reported verbatim in a failure message.
const MAX_TEXT_MESSAGE: usize = 256;

/// How a source signals that it has no imagery for a tile.
///
/// Some servers answer with a dedicated status, others with a normal
/// response carrying a marker header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoTilePolicy {
    statuses: Vec<u16>,
    /// Lower-cased header name and the value that marks a missing tile.
    headers: Vec<(String, String)>,
}

impl NoTilePolicy {
    pub fn new(statuses: Vec<u16>, headers: Vec<(String, String)>) -> Self {
        Self {
            statuses,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty() && self.headers.is_empty()
    }

    pub fn is_no_tile(&self, response: &HttpResponse) -> bool {
        self.statuses.contains(&response.status)
            || self.headers.iter().any(|(name, value)| {
                response
                    .header(name)
                    .is_some_and(|actual| actual.trim().eq_ignore_ascii_case(value))
            })
    }
}

/// Human-readable message for an error response.
///
/// Prefers a `ServiceException`/`ExceptionText` element, then a short
/// plain-text body, then the bare status.
pub(crate) fn describe_error(status: u16, body: &[u8]) -> String {
    if let Some(message) = exception_text(body) {
        return message;
    }
    if let Ok(text) = std::str::from_utf8(body) {
        let text = text.trim();
        if !text.is_empty() && text.len() <= MAX_TEXT_MESSAGE && !text.starts_with('<') {
            return text.to_string();
        }
    }
    format!("status {}", status)
}

fn exception_text(body: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    let document = roxmltree::Document::parse(text).ok()?;
    document
        .descendants()
        .filter(|n| {
            n.is_element() && matches!(n.tag_name().name(), "ServiceException" | "ExceptionText")
        })
        .find_map(|n| {
            let message = n.text()?.trim();
            (!message.is_empty()).then(|| message.to_string())
        })
}
