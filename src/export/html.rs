//! Rich-text helpers: plain text for CSV cells and attachment discovery

use reqwest::Url;
use scraper::{Html, Selector};

const MAX_FILENAME_LEN: usize = 180;

/// Image URLs containing any of these belong to people, not content.
const PORTRAIT_MARKERS: [&str; 3] = ["avatar", "profile", "people"];

/// A downloadable file referenced from a task or comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub url: String,
    pub filename: Option<String>,
}

impl AttachmentRef {
    /// Name to save under: declared filename, else the URL's last path segment.
    pub fn file_name(&self) -> String {
        let declared = self.filename.as_deref().filter(|n| !n.trim().is_empty());
        let name = match declared {
            Some(name) => name.to_string(),
            None => filename_from_url(&self.url).unwrap_or_else(|| "attachment".to_string()),
        };
        sanitize_filename(&name)
    }
}

/// Visible text of an HTML fragment, whitespace collapsed to single spaces.
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let fragment = Html::parse_fragment(html);
    let words: Vec<&str> = fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect();
    words.join(" ")
}

/// Files referenced inline: `<bc-attachment href>` elements and content
/// images, in document order.
pub fn extract_attachment_refs(html: &str) -> Vec<AttachmentRef> {
    let mut refs = Vec::new();
    if html.trim().is_empty() {
        return refs;
    }

    let (Ok(attachment_sel), Ok(img_sel)) = (
        Selector::parse("bc-attachment, img[src]"),
        Selector::parse("img[src]"),
    ) else {
        return refs;
    };

    let fragment = Html::parse_fragment(html);
    for element in fragment.select(&attachment_sel) {
        let attrs = element.value();

        if img_sel.matches(&element) {
            let Some(src) = attrs.attr("src") else { continue };
            if is_portrait(src) || !is_http(src) {
                continue;
            }
            // Images inside an attachment element were already counted.
            let nested = element
                .ancestors()
                .filter_map(scraper::ElementRef::wrap)
                .any(|a| a.value().name() == "bc-attachment");
            if nested {
                continue;
            }
            refs.push(AttachmentRef {
                url: src.to_string(),
                filename: attrs.attr("alt").filter(|a| a.contains('.')).map(String::from),
            });
        } else if let Some(href) = attrs.attr("href").or_else(|| attrs.attr("url")) {
            if !is_http(href) {
                continue;
            }
            refs.push(AttachmentRef {
                url: href.to_string(),
                filename: attrs.attr("filename").map(String::from),
            });
        }
    }

    refs
}

fn is_portrait(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    PORTRAIT_MARKERS.iter().any(|m| lower.contains(m))
}

fn is_http(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment).ok()?;
    Some(decoded.into_owned())
}

/// Keep `[A-Za-z0-9 ._-]`, replace the rest with `_`, cap the length.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LEN)
        .collect();

    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}
