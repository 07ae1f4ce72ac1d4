/// Sanitize engine output before it reaches a page.
/// Strips control characters, collapses runs of spaces, trims each line and
/// drops empty lines. Printable symbols (currency, punctuation) are kept.
pub fn sanitize_recognized_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .map(|c| if c == '\t' { ' ' } else { c })
        .collect::<String>()
        .lines()
        .map(collapse_spaces)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Flatten multi-line output into one line (for line-granularity regions).
pub fn flatten_to_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn collapse_spaces(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}
