pub mod claude_cli;
pub mod openai_compat;

/// At most `max` bytes of `s` for log previews, cut on a char boundary.
pub(crate) fn preview(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}
