pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const MAX_BLOCK_REASON_CHARS: usize = 300;
pub const MAX_REPORT_REASON_CHARS: usize = 1000;

/// Trims, drops anything shaped like a markup tag and caps the result at
/// `max_chars` characters. An empty result means the input carried no text.
pub fn sanitize_text(raw: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw.trim();
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('>') {
            // `<>` is not a tag.
            Some(0) => {
                out.push_str("<>");
                rest = &after[1..];
            }
            Some(close) => rest = &after[close + 1..],
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.trim().chars().take(max_chars).collect()
}
