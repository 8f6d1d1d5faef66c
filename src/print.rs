//! Print layout.
//!
//! Turns a rendered fragment into a standalone HTML document that a PDF
//! renderer can lay out without access to the session: paper size and
//! margins go into `@page`, page breaks become forced breaks, and every
//! handle URL is inlined as a `data:` URL.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use base64::Engine;
use regex::{Captures, Regex};

use crate::image::{BlobStore, HANDLE_URL_PREFIX};
use crate::style::DEFAULT_FONT_SIZE;

static HANDLE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{}\d+", regex::escape(HANDLE_URL_PREFIX))).expect("handle url pattern is valid")
});

/// Supported paper sizes.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaperSize {
    #[default]
    A4,
    A5,
    Letter,
    Legal,
}

impl PaperSize {
    pub const ALL: [Self; 4] = [Self::A4, Self::A5, Self::Letter, Self::Legal];

    pub fn name(self) -> &'static str {
        match self {
            Self::A4 => "A4",
            Self::A5 => "A5",
            Self::Letter => "Letter",
            Self::Legal => "Legal",
        }
    }

    /// Width and height in millimetres, portrait.
    pub fn dimensions_mm(self) -> (f64, f64) {
        match self {
            Self::A4 => (210.0, 297.0),
            Self::A5 => (148.0, 210.0),
            Self::Letter => (215.9, 279.4),
            Self::Legal => (215.9, 355.6),
        }
    }

    /// CSS `@page` size keyword.
    pub fn css_size(self) -> &'static str {
        match self {
            Self::A4 => "a4",
            Self::A5 => "a5",
            Self::Letter => "letter",
            Self::Legal => "legal",
        }
    }
}

impl fmt::Display for PaperSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown paper size {0:?} (expected A4, A5, Letter or Legal)")]
pub struct UnknownPaperSize(pub String);

impl FromStr for PaperSize {
    type Err = UnknownPaperSize;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|paper| paper.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownPaperSize(s.to_string()))
    }
}

/// Layout options for [`printable_document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintSettings {
    pub paper: PaperSize,
    /// Base font size in points, used when the document does not set one.
    pub font_size: u32,
    /// Document title for the `<title>` element.
    pub title: Option<String>,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            paper: PaperSize::default(),
            font_size: DEFAULT_FONT_SIZE,
            title: None,
        }
    }
}

impl PrintSettings {
    pub fn with_paper(paper: PaperSize) -> Self {
        Self {
            paper,
            ..Self::default()
        }
    }
}

/// `data:` URL for an image payload.
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

/// Replace every live handle URL in `html` with the payload as a `data:` URL.
///
/// URLs whose handle has already been released are blanked.
pub fn inline_images(html: &str, store: &BlobStore) -> String {
    HANDLE_URL
        .replace_all(html, |caps: &Captures| {
            let url = &caps[0];
            match store.resolve(url) {
                Some((bytes, mime)) => data_url(&mime, &bytes),
                None => {
                    tracing::warn!(url, "image handle released before printing");
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Wrap a rendered fragment into a self-contained printable document.
pub fn printable_document(html: &str, settings: &PrintSettings, store: &BlobStore) -> String {
    let _scope = crate::perf::scope("print.document");
    let body = inline_images(html, store);
    let title = ammonia::clean_text(settings.title.as_deref().unwrap_or("Untitled"));
    let (width, height) = settings.paper.dimensions_mm();
    crate::perf::log_event(
        "print.document",
        format!("paper={} bytes={}", settings.paper, body.len()),
    );
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
@page {{
  size: {size};
  margin: 2cm;
  counter-increment: page;
}}
@page {{
  @bottom-center {{
    content: counter(page);
    font-size: 8pt;
  }}
}}
html, body {{
  margin: 0;
}}
.printable {{
  width: calc({width}mm - 4cm);
  min-height: calc({height}mm - 4cm);
}}
.prose {{
  font-size: {font_size}pt;
}}
.prose p + h2 {{
  margin-top: 1.5rem;
}}
.prose p + p {{
  margin-top: 1rem;
}}
.prose svg {{
  display: inline-block;
}}
.page-break {{
  height: 0;
  page-break-after: always;
  break-after: page;
  margin: 0;
  border: none;
}}
</style>
</head>
<body>
<article class="prose printable">
{body}
</article>
</body>
</html>
"#,
        size = settings.paper.css_size(),
        font_size = settings.font_size,
    )
}
