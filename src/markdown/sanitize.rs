//! HTML allow-list.
//!
//! Documents may carry their own `<style>` block and inline SVG icons, so the
//! list is wider than ammonia's defaults: styling attributes on every tag,
//! `svg`/`path` primitives, and the image handle scheme for `src`.

use ammonia::Builder;

use crate::image::HANDLE_SCHEME;

const EXTRA_TAGS: &[&str] = &["span", "div", "p", "br", "svg", "path", "style", "a"];

const GENERIC_ATTRIBUTES: &[&str] = &[
    "class",
    "style",
    "width",
    "height",
    "display",
    "align",
    "valign",
    "for",
    "viewBox",
    "fill",
    "stroke",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "xmlns",
];

const SVG_ATTRIBUTES: &[&str] = &[
    "xmlns",
    "fill",
    "viewBox",
    "class",
    "stroke",
    "stroke-width",
];

const PATH_ATTRIBUTES: &[&str] = &[
    "d",
    "fill",
    "stroke",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
];

fn sanitizer() -> Builder<'static> {
    let mut builder = Builder::default();
    // `style` content is kept, so it cannot also be a clean-content tag.
    builder
        .rm_clean_content_tags(&["style"])
        .add_tags(EXTRA_TAGS)
        .add_generic_attributes(GENERIC_ATTRIBUTES)
        .add_tag_attributes("svg", SVG_ATTRIBUTES)
        .add_tag_attributes("path", PATH_ATTRIBUTES)
        .add_url_schemes(&[HANDLE_SCHEME]);
    builder
}

/// Filter `html` against the document allow-list.
pub fn sanitize(html: &str) -> String {
    sanitizer().clean(html).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_removed_entirely() {
        let out = sanitize("<p>hi</p><script>alert(1)</script>");
        assert_eq!(out, "<p>hi</p>");
    }

    #[test]
    fn test_page_break_marker_survives() {
        let out = sanitize(r#"<div class="page-break"></div>"#);
        assert_eq!(out, r#"<div class="page-break"></div>"#);
    }

    #[test]
    fn test_event_handlers_are_stripped() {
        let out = sanitize(r#"<span class="x" onclick="steal()">t</span>"#);
        assert_eq!(out, r#"<span class="x">t</span>"#);
    }

    #[test]
    fn test_style_block_is_kept() {
        let out = sanitize("<style>.prose { font-size: 12pt; }</style>");
        assert!(out.contains("<style>"));
        assert!(out.contains("font-size: 12pt;"));
    }

    #[test]
    fn test_handle_scheme_is_allowed_for_images() {
        let out = sanitize(r#"<img src="blob:mdpaper/7" alt="a">"#);
        assert!(out.contains(r#"src="blob:mdpaper/7""#), "got {out}");
    }

    #[test]
    fn test_javascript_links_are_dropped() {
        let out = sanitize(r#"<a href="javascript:alert(1)">x</a>"#);
        assert!(!out.contains("javascript"));
    }

    #[test]
    fn test_inline_svg_icon_is_kept() {
        let out = sanitize(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 24 24" fill="none"><path d="M5 12h14" stroke-width="2"></path></svg>"#,
        );
        assert!(out.contains("<svg"), "got {out}");
        assert!(out.contains(r#"d="M5 12h14""#), "got {out}");
        assert!(out.contains("viewBox"), "got {out}");
    }
}
