//! Code span protection.
//!
//! Fenced blocks and inline code spans are swapped for sentinel tokens before
//! any text-level rewriting runs, then swapped back afterwards. The sentinel
//! prefix is chosen per call so that it never occurs in the input.

/// Opens a sentinel. Private-use code point.
const SENTINEL_OPEN: char = '\u{E000}';
/// Closes a sentinel. Private-use code point.
const SENTINEL_CLOSE: char = '\u{E001}';

/// Markdown text with its code replaced by sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protected {
    /// Text with every code span replaced by a sentinel.
    pub text: String,
    /// Original code text, indexed by sentinel number (first occurrence order).
    spans: Vec<String>,
    /// `SENTINEL_OPEN` + nonce + `:`; absent from the original input.
    prefix: String,
}

impl Protected {
    /// Original code spans in order of first occurrence.
    pub fn spans(&self) -> &[String] {
        &self.spans
    }

    /// Put the original code back into `text`.
    ///
    /// `text` is usually `self.text` after directive expansion. Sentinels that
    /// do not parse are copied through untouched.
    pub fn restore(&self, text: &str) -> String {
        if self.spans.is_empty() {
            return text.to_string();
        }

        let restored_len: usize = self.spans.iter().map(String::len).sum();
        let mut out = String::with_capacity(text.len() + restored_len);
        let mut rest = text;
        while let Some(pos) = rest.find(&self.prefix) {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + self.prefix.len()..];
            let restored = after.find(SENTINEL_CLOSE).and_then(|end| {
                let index: usize = after[..end].parse().ok()?;
                Some((self.spans.get(index)?, end))
            });
            match restored {
                Some((span, end)) => {
                    out.push_str(span);
                    rest = &after[end + SENTINEL_CLOSE.len_utf8()..];
                }
                None => {
                    out.push_str(&self.prefix);
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn sentinel(&self, index: usize) -> String {
        format!("{}{index}{SENTINEL_CLOSE}", self.prefix)
    }
}

/// Replace fenced code blocks and inline code spans with sentinels.
///
/// Fences are runs of three or more backticks or tildes at the start of a
/// line (after optional indentation). A fence is closed by a line holding a
/// run of the same character at least as long; an unclosed fence runs to the
/// end of the text. Inline spans are backtick runs closed by a run of the
/// same length on the same line. Unmatched runs stay literal.
pub fn protect(source: &str) -> Protected {
    let mut protected = Protected {
        text: String::with_capacity(source.len()),
        spans: Vec::new(),
        prefix: sentinel_prefix(source),
    };

    let bytes = source.as_bytes();
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        let line_start = i == 0 || bytes[i - 1] == b'\n';
        if line_start && let Some(end) = fenced_block_end(source, i) {
            push_span(&mut protected, source, copied, i, end);
            i = end;
            copied = end;
            continue;
        }

        if bytes[i] == b'`' {
            let run = run_length(bytes, i, b'`');
            if let Some(end) = inline_span_end(bytes, i, run) {
                push_span(&mut protected, source, copied, i, end);
                i = end;
                copied = end;
            } else {
                i += run;
            }
            continue;
        }

        i += 1;
    }
    protected.text.push_str(&source[copied..]);
    protected
}

fn push_span(protected: &mut Protected, source: &str, copied: usize, start: usize, end: usize) {
    protected.text.push_str(&source[copied..start]);
    let sentinel = protected.sentinel(protected.spans.len());
    protected.text.push_str(&sentinel);
    protected.spans.push(source[start..end].to_string());
}

fn sentinel_prefix(source: &str) -> String {
    let mut nonce = 0u64;
    loop {
        let prefix = format!("{SENTINEL_OPEN}{nonce}:");
        if !source.contains(&prefix) {
            return prefix;
        }
        nonce += 1;
    }
}

fn run_length(bytes: &[u8], start: usize, ch: u8) -> usize {
    bytes[start..].iter().take_while(|&&b| b == ch).count()
}

/// End (exclusive) of a fenced block opening at `line_start`, if the line
/// opens one. The end excludes the newline after the closing fence.
fn fenced_block_end(source: &str, line_start: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let indent = run_indent(bytes, line_start);
    let fence_start = line_start + indent;
    let fence_char = *bytes.get(fence_start)?;
    if fence_char != b'`' && fence_char != b'~' {
        return None;
    }
    let fence_len = run_length(bytes, fence_start, fence_char);
    if fence_len < 3 {
        return None;
    }

    let open_end = line_end(bytes, fence_start);
    // A backtick fence's info string may not contain backticks.
    if fence_char == b'`' && bytes[fence_start + fence_len..open_end].contains(&b'`') {
        return None;
    }

    let mut cursor = open_end;
    while cursor < bytes.len() {
        let next_line = cursor + 1;
        let next_end = line_end(bytes, next_line);
        let close_start = next_line + run_indent(bytes, next_line);
        let close_len = if close_start < bytes.len() {
            run_length(bytes, close_start, fence_char)
        } else {
            0
        };
        if close_len >= fence_len
            && bytes[close_start + close_len..next_end]
                .iter()
                .all(u8::is_ascii_whitespace)
        {
            return Some(next_end);
        }
        cursor = next_end;
    }
    Some(bytes.len())
}

fn run_indent(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .take_while(|&&b| b == b' ' || b == b'\t')
        .count()
}

/// Index of the `\n` ending the line containing `pos`, or the text length.
fn line_end(bytes: &[u8], pos: usize) -> usize {
    bytes[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |offset| pos + offset)
}

fn inline_span_end(bytes: &[u8], start: usize, run: usize) -> Option<usize> {
    let mut i = start + run;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => return None,
            b'`' => {
                let closing = run_length(bytes, i, b'`');
                if closing == run {
                    return Some(i + closing);
                }
                i += closing;
            }
            _ => i += 1,
        }
    }
    None
}
