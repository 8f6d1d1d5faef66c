//! The document's own `<style>` block.
//!
//! Font choices are stored in the markdown itself as `.prose` rules inside a
//! leading `<style>` block, so they travel with the document and survive the
//! sanitizer (which keeps `style` elements).

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};

pub const DEFAULT_FONT_SIZE: u32 = 12;
pub const MIN_FONT_SIZE: u32 = 8;
pub const MAX_FONT_SIZE: u32 = 72;

static STYLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<style>\s*(?P<body>[\s\S]*?)\s*</style>").expect("style block pattern is valid")
});

static PROSE_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.prose\s*\{(?P<decls>[^}]*)\}").expect("prose rule pattern is valid")
});

static FONT_FAMILY_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"font-family:\s*([^;]+);").expect("font-family pattern is valid"));

static FONT_SIZE_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"font-size:\s*(\d+)").expect("font-size pattern is valid"));

/// Fonts offered by the toolbar.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Font {
    #[default]
    Pretendard,
    SourceHanSerif,
    KoddiUdOnGothic,
}

impl Font {
    pub const ALL: [Self; 3] = [Self::Pretendard, Self::SourceHanSerif, Self::KoddiUdOnGothic];

    /// CSS family name written into the style block.
    pub fn family(self) -> &'static str {
        match self {
            Self::Pretendard => "Pretendard",
            Self::SourceHanSerif => "본명조",
            Self::KoddiUdOnGothic => "Koddi UD 온고딕",
        }
    }

    /// Font whose family name is `family`, ignoring surrounding quotes.
    pub fn from_family(family: &str) -> Option<Self> {
        let family = family.trim().trim_matches(['"', '\'']);
        Self::ALL.into_iter().find(|font| font.family() == family)
    }
}

impl fmt::Display for Font {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.family())
    }
}

/// Font settings recovered from a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleSettings {
    pub font_family: Option<String>,
    pub font_size: Option<u32>,
}

impl StyleSettings {
    /// The known font, if the family is one of [`Font::ALL`].
    pub fn font(&self) -> Option<Font> {
        self.font_family.as_deref().and_then(Font::from_family)
    }

    pub fn font_size_or_default(&self) -> u32 {
        self.font_size.map_or(DEFAULT_FONT_SIZE, clamp_font_size)
    }
}

pub fn clamp_font_size(size: u32) -> u32 {
    size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
}

/// Set the `.prose` font family.
pub fn update_font_family(text: &str, family: &str) -> String {
    update_prose_property(text, "font-family", family)
}

/// Set the `.prose` font size in points, clamped to the supported range.
pub fn update_font_size(text: &str, size: u32) -> String {
    update_prose_property(text, "font-size", &format!("{}pt", clamp_font_size(size)))
}

/// Read the font settings from the `.prose` rules of the first `<style>` block.
///
/// Each property comes from the first `.prose` rule that declares it; other
/// selectors are ignored.
pub fn extract_style(text: &str) -> StyleSettings {
    let Some(caps) = STYLE_BLOCK.captures(text) else {
        return StyleSettings::default();
    };
    let mut settings = StyleSettings::default();
    for rule in PROSE_RULE.captures_iter(&caps["body"]) {
        let decls = &rule["decls"];
        if settings.font_family.is_none() {
            settings.font_family = FONT_FAMILY_VALUE
                .captures(decls)
                .map(|c| c[1].trim().to_string());
        }
        if settings.font_size.is_none() {
            settings.font_size = FONT_SIZE_VALUE
                .captures(decls)
                .and_then(|c| c[1].parse().ok());
        }
    }
    settings
}

fn update_prose_property(text: &str, property: &str, value: &str) -> String {
    let rule = format!(".prose {{\n  {property}: {value};\n}}");

    let Some(block) = STYLE_BLOCK.captures(text) else {
        return format!("<style>\n{rule}\n</style>\n\n{text}");
    };

    let pattern = Regex::new(&format!(
        r"(?P<head>\.prose\s*\{{[^}}]*?{property}:\s*)[^;}}]*(?P<tail>;?)"
    ));
    if let Ok(existing) = pattern
        && existing.is_match(text)
    {
        return existing
            .replace(text, |caps: &Captures| format!("{}{value}{}", &caps["head"], &caps["tail"]))
            .into_owned();
    }

    let whole = block.get(0).map_or(0..0, |m| m.range());
    let body = &block["body"];
    let separator = if body.is_empty() { "" } else { "\n" };
    format!(
        "{}<style>\n{body}{separator}{rule}\n</style>{}",
        &text[..whole.start],
        &text[whole.end..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepends_style_block_when_absent() {
        let out = update_font_family("# Hi\n", "Pretendard");
        assert_eq!(out, "<style>\n.prose {\n  font-family: Pretendard;\n}\n</style>\n\n# Hi\n");
    }

    #[test]
    fn test_appends_rule_to_existing_block() {
        let text = "<style>\n.page { color: red; }\n</style>\n\nbody";
        let out = update_font_size(text, 14);
        assert_eq!(
            out,
            "<style>\n.page { color: red; }\n.prose {\n  font-size: 14pt;\n}\n</style>\n\nbody"
        );
    }

    #[test]
    fn test_replaces_existing_value_only() {
        let text = update_font_family("text", "Pretendard");
        let text = update_font_size(&text, 11);
        let text = update_font_family(&text, "본명조");
        let text = update_font_size(&text, 13);
        assert_eq!(text.matches(".prose").count(), 2);
        let style = extract_style(&text);
        assert_eq!(style.font_family.as_deref(), Some("본명조"));
        assert_eq!(style.font_size, Some(13));
        assert!(text.ends_with("</style>\n\ntext"));
    }

    #[test]
    fn test_rule_with_both_properties_keeps_the_other() {
        let text = "<style>\n.prose { font-family: A; font-size: 10pt; }\n</style>\n";
        let out = update_font_size(text, 20);
        assert!(out.contains("font-family: A;"));
        assert!(out.contains("font-size: 20pt;"));
    }

    #[test]
    fn test_font_size_is_clamped() {
        assert_eq!(extract_style(&update_font_size("", 200)).font_size, Some(MAX_FONT_SIZE));
        assert_eq!(extract_style(&update_font_size("", 1)).font_size, Some(MIN_FONT_SIZE));
    }

    #[test]
    fn test_extract_style_ignores_other_selectors() {
        let text = "<style>\n.page { font-family: Serif; font-size: 30pt; }\n\
                    .prose { font-size: 10pt; }\n</style>\n";
        let style = extract_style(text);
        assert_eq!(style.font_family, None);
        assert_eq!(style.font_size, Some(10));

        let out = update_font_family(text, "Pretendard");
        assert_eq!(extract_style(&out).font_family.as_deref(), Some("Pretendard"));
        assert!(out.contains(".page { font-family: Serif;"));
    }

    #[test]
    fn test_extract_style_without_block() {
        assert_eq!(extract_style("# no style"), StyleSettings::default());
        assert_eq!(StyleSettings::default().font_size_or_default(), DEFAULT_FONT_SIZE);
    }

    #[test]
    fn test_font_from_family() {
        assert_eq!(Font::from_family("Koddi UD 온고딕"), Some(Font::KoddiUdOnGothic));
        assert_eq!(Font::from_family("'Pretendard'"), Some(Font::Pretendard));
        assert_eq!(Font::from_family("Comic Sans"), None);
        let settings = extract_style(&update_font_family("", Font::SourceHanSerif.family()));
        assert_eq!(settings.font(), Some(Font::SourceHanSerif));
    }
}
