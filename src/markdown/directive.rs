//! Page-break and local-image directives.
//!
//! Both expansions run on protected text (see [`super::protect`]), so code
//! spans never reach this module.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::protect::protect;
use crate::image::is_bare_file_name;

/// Literal token that forces a page break when printing.
pub const PAGE_BREAK: &str = "---pagebreak---";

/// Block element that replaces [`PAGE_BREAK`]; the class is on the sanitizer allow-list.
pub const PAGE_BREAK_MARKER: &str = r#"<div class="page-break"></div>"#;

/// Prefix marking an image target as a registry reference: `![alt]($name)`.
pub const LOCAL_IMAGE_PREFIX: char = '$';

// The target may be bare (`$name`) or angle-bracketed (`<$name>`), with an
// optional double-quoted title after it.
static LOCAL_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"!\[(?P<alt>[^\]\n]*)\]\(\s*(?:<\$(?P<angled>[^>\n]*)>|\$(?P<name>[^)\n]*?))(?:\s+(?P<title>"[^"\n]*"))?\s*\)"#,
    )
    .expect("local image pattern is valid")
});

/// Resolves registry names to render-time handle URLs.
pub trait HandleLookup {
    /// Handle URL for `name`, or `None` if nothing is registered under it.
    fn handle_url(&self, name: &str) -> Option<&str>;
}

impl<F> HandleLookup for F
where
    F: Fn(&str) -> Option<&'static str>,
{
    fn handle_url(&self, name: &str) -> Option<&str> {
        self(name)
    }
}

/// Expand page breaks, then local images.
pub fn expand_directives(protected: &str, images: &impl HandleLookup) -> String {
    let text = expand_page_breaks(protected);
    expand_local_images(&text, images)
}

/// Replace every [`PAGE_BREAK`] token with [`PAGE_BREAK_MARKER`].
///
/// A token alone on its line becomes its own HTML block followed by a blank
/// line, so the markdown after it is not absorbed into the block. Lines of an
/// indented code block are left as they are.
pub fn expand_page_breaks(text: &str) -> String {
    if !text.contains(PAGE_BREAK) {
        return text.to_string();
    }

    let mut blocks = BlockTracker::new();
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if blocks.is_indented_code(line) {
            out.push_str(line);
        } else if line.trim() == PAGE_BREAK {
            out.push_str(PAGE_BREAK_MARKER);
            out.push_str("\n\n");
        } else {
            out.push_str(&line.replace(PAGE_BREAK, PAGE_BREAK_MARKER));
        }
    }
    out
}

/// Line-by-line view of just enough block structure to spot indented code.
struct BlockTracker {
    after_blank: bool,
    in_code: bool,
    in_list: bool,
}

impl BlockTracker {
    const fn new() -> Self {
        Self {
            after_blank: true,
            in_code: false,
            in_list: false,
        }
    }

    /// Feed the next line; true if it belongs to an indented code block.
    ///
    /// Indented code cannot interrupt a paragraph, and inside a list an
    /// indented line is item content.
    fn is_indented_code(&mut self, line: &str) -> bool {
        if line.trim().is_empty() {
            self.after_blank = true;
            return self.in_code;
        }
        let indent = indent_columns(line);
        let in_code = indent >= 4 && !self.in_list && (self.in_code || self.after_blank);
        if indent < 4 {
            if starts_list_item(line.trim_start()) {
                self.in_list = true;
            } else if self.after_blank {
                self.in_list = false;
            }
        }
        self.in_code = in_code;
        self.after_blank = false;
        in_code
    }
}

fn indent_columns(line: &str) -> usize {
    let mut columns = 0;
    for c in line.chars() {
        match c {
            ' ' => columns += 1,
            '\t' => columns += 4 - columns % 4,
            _ => break,
        }
    }
    columns
}

fn starts_list_item(line: &str) -> bool {
    let rest = line.strip_prefix(['-', '*', '+']).or_else(|| {
        let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if (1..=9).contains(&digits) {
            line[digits..].strip_prefix(['.', ')'])
        } else {
            None
        }
    });
    rest.is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', '\t', '\r', '\n']))
}

/// Registry name a local-image match points at.
fn target_name<'t>(caps: &Captures<'t>) -> &'t str {
    caps.name("angled")
        .or_else(|| caps.name("name"))
        .map_or("", |m| m.as_str().trim())
}

/// Rewrite `![alt]($name)` to point at the registry handle for `name`.
///
/// Unknown names, and names that are not bare file names, get an empty
/// source so no file-system path or remote URL leaks into the output. A
/// title, if present, is kept.
pub fn expand_local_images(text: &str, images: &impl HandleLookup) -> String {
    LOCAL_IMAGE
        .replace_all(text, |caps: &Captures| {
            let alt = &caps["alt"];
            let name = target_name(caps);
            let url = if is_bare_file_name(name) {
                images.handle_url(name)
            } else {
                None
            };
            if url.is_none() {
                tracing::debug!(name, "unresolved local image reference");
            }
            match (url, caps.name("title")) {
                (Some(url), Some(title)) => format!("![{alt}](<{url}> {})", title.as_str()),
                (Some(url), None) => format!("![{alt}](<{url}>)"),
                (None, Some(title)) => format!("![{alt}](<> {})", title.as_str()),
                (None, None) => format!("![{alt}]()"),
            }
        })
        .into_owned()
}

/// Names referenced by local-image directives outside code, deduplicated in
/// order of first reference.
pub fn referenced_images(markdown: &str) -> Vec<String> {
    let protected = protect(markdown);
    let mut names: Vec<String> = Vec::new();
    for caps in LOCAL_IMAGE.captures_iter(&protected.text) {
        let name = target_name(&caps);
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}
