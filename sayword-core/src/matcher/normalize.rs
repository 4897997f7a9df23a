/// Lowercase, drop punctuation and collapse whitespace.
///
/// Letters and numerals of every script survive (`é`, `ñ`, `٣`, `字`), so
/// the same rules apply to Spanish or Arabic answers as to English ones.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else if ch.is_whitespace() {
            pending_space = true;
        }
    }

    out
}
