use once_cell::sync::Lazy;
use regex::Regex;

static TOKENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n|\S+").unwrap());

/// Reassembles an upstream fragment sequence into display-ready partial text.
///
/// Fragments arrive with arbitrary chunking; nothing guarantees they align on
/// word boundaries. Each fragment is split into newline tokens and whitespace-
/// delimited tokens, and printable tokens are joined with a single space so
/// that no two fragments' content ever runs together. A fragment boundary that
/// falls inside one word therefore splits that word in two — known lossy
/// behavior, kept as-is.
///
/// The buffer is append-only for the lifetime of one generation.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    buf: String,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fragment(&mut self, fragment: &str) {
        for token in TOKENS.find_iter(fragment) {
            let token = token.as_str();
            if token == "\n" {
                self.buf.push('\n');
            } else {
                if !self.buf.is_empty() && !self.buf.ends_with([' ', '\n']) {
                    self.buf.push(' ');
                }
                self.buf.push_str(token);
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
