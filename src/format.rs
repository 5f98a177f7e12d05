use once_cell::sync::Lazy;
use regex::Regex;

static TRUNCATED_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\(([^)]*)$").unwrap());
static BACKTICKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"`+").unwrap());
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+\s*(.+)$").unwrap());
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[-*]\s+").unwrap());
static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(\d+)\.\s*").unwrap());
static BOLD_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\n\*.+\*)").unwrap());
static STRAY_HASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"#+").unwrap());
static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"  +").unwrap());
static MULTI_BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Removes markup fragments that would fail the transport's markup parser.
///
/// Order matters: unpaired emphasis markers first, then truncated trailing
/// links, then backticks. Running it on already-sanitized text is a no-op.
pub fn sanitize_markup(text: &str) -> String {
    let text = strip_unpaired_runs(text, '*');
    let text = strip_unpaired_runs(&text, '_');
    let text = TRUNCATED_LINK.replace(&text, "$1 ($2)");
    BACKTICKS.replace_all(&text, "").into_owned()
}

/// Rewrites common markdown structure into what the transport can display:
/// headings become bold lines, bullet markers become a bullet glyph, numbered
/// lists get uniform punctuation, and leftover code fences, stray hashes,
/// space runs and blank-line runs are collapsed.
pub fn format_for_transport(text: &str) -> String {
    let text = HEADING.replace_all(text, "*${1}*");
    let text = BULLET.replace_all(&text, "\u{2022} ");
    let text = NUMBERED.replace_all(&text, "${1}. ");
    // Blank line before each bold (former heading) line; the blank-line
    // collapse below bounds the run length.
    let text = BOLD_LINE.replace_all(&text, "\n${1}");
    let text = STRAY_HASHES.replace_all(&text, "");
    let text = CODE_FENCE.replace_all(&text, "");
    let text = MULTI_SPACE.replace_all(&text, " ");
    let text = MULTI_BLANK.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Drops runs of exactly one `marker` while keeping longer runs intact, so
/// `**bold**` survives but a stray `*` does not. A run of three is kept
/// whole rather than split into a pair and a stripped single.
fn strip_unpaired_runs(text: &str, marker: char) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != marker {
            out.push(c);
            continue;
        }
        let mut run = 1;
        while chars.peek() == Some(&marker) {
            chars.next();
            run += 1;
        }
        if run > 1 {
            for _ in 0..run {
                out.push(marker);
            }
        }
    }
    out
}
