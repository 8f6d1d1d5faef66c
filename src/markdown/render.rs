//! Markdown to sanitized HTML.

use std::panic::{self, AssertUnwindSafe};

use comrak::{Options, markdown_to_html};
use tracing::warn;

use super::directive::{HandleLookup, expand_directives};
use super::protect::protect;
use super::sanitize::sanitize;

/// Convert markdown to sanitized HTML.
///
/// The order is fixed: protect code, expand directives, restore code,
/// render with raw HTML allowed, sanitize. Rendering never fails; if the
/// renderer gives up the whole input comes back as escaped text.
///
/// # Example
///
/// ```
/// use mdpaper::markdown::render_html;
///
/// let lookup = |_: &str| -> Option<&'static str> { None };
/// let html = render_html("# Hi\n\n---pagebreak---\n", &lookup);
/// assert!(html.contains("<h1>Hi</h1>"));
/// assert!(html.contains(r#"<div class="page-break"></div>"#));
/// ```
pub fn render_html(source: &str, images: &impl HandleLookup) -> String {
    let _scope = crate::perf::scope("markdown.render");

    let protected = protect(source);
    let expanded = expand_directives(&protected.text, images);
    let markdown = protected.restore(&expanded);

    match panic::catch_unwind(AssertUnwindSafe(|| to_raw_html(&markdown))) {
        Ok(raw) => {
            let html = sanitize(&raw);
            crate::perf::log_event(
                "markdown.render",
                format!(
                    "source_bytes={} code_spans={} html_bytes={}",
                    source.len(),
                    protected.spans().len(),
                    html.len()
                ),
            );
            html
        }
        Err(_) => {
            warn!(bytes = source.len(), "markdown renderer failed; showing escaped text");
            format!("<p>{}</p>", ammonia::clean_text(source))
        }
    }
}

fn to_raw_html(markdown: &str) -> String {
    let mut options = Options::default();

    // GFM extensions
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;

    // Raw HTML passes through here and is filtered by the sanitizer.
    options.render.unsafe_ = true;

    markdown_to_html(markdown, &options)
}
