//! Markdown to sanitized HTML pipeline.
//!
//! This module handles:
//! - Shielding code spans from text rewriting ([`protect`])
//! - Page-break and local-image directives
//! - Rendering with comrak and sanitizing with ammonia

mod directive;
mod protect;
mod render;
mod sanitize;

pub use directive::{
    HandleLookup, LOCAL_IMAGE_PREFIX, PAGE_BREAK, PAGE_BREAK_MARKER, expand_directives,
    expand_local_images, expand_page_breaks, referenced_images,
};
pub use protect::{Protected, protect};
pub use render::render_html;
pub use sanitize::sanitize;

/// Markup for a local-image directive: `![alt]($name)`.
pub fn local_image_markup(alt: &str, name: &str) -> String {
    format!("![{alt}]({LOCAL_IMAGE_PREFIX}{name})")
}
