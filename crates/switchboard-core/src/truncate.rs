/// Default preview length for tool results and inputs shown in chat.
pub const DEFAULT_PREVIEW_CHARS: usize = 200;

/// Truncate to at most `max_chars` characters, marking the cut with `…`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((idx, _)) => {
            let mut out = text[..idx].trim_end().to_string();
            out.push('…');
            out
        }
    }
}

/// First line of `text`, truncated for display. Tool results can be
/// arbitrarily long; only this much ever reaches the chat.
pub fn first_line_preview(text: &str, max_chars: usize) -> String {
    let first = text.lines().next().unwrap_or("").trim();
    truncate_chars(first, max_chars)
}

/// Keep the last `max_bytes` of `output` (cut at a char boundary).
/// Used for stderr tails, where the end carries the actual error.
pub fn tail_bytes(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut start = output.len() - max_bytes;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("[truncated: {} bytes]\n{}", output.len(), &output[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_when_within_limit() {
        assert_eq!(truncate_chars("hello world", 1024), "hello world");
    }

    #[test]
    fn exact_boundary_no_truncation() {
        let input = "a".repeat(100);
        assert_eq!(truncate_chars(&input, 100), input);
    }

    #[test]
    fn one_over_truncates() {
        let input = "a".repeat(101);
        let out = truncate_chars(&input, 100);
        assert_eq!(out.chars().count(), 101);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn counts_chars_not_bytes() {
        let input = "🦀".repeat(10);
        let out = truncate_chars(&input, 3);
        assert_eq!(out, "🦀🦀🦀…");
    }

    #[test]
    fn preview_uses_first_line_only() {
        let payload = "  total 48\ndrwxr-xr-x  5 user\n-rw-r--r--  1 user";
        assert_eq!(first_line_preview(payload, 200), "total 48");
    }

    #[test]
    fn preview_of_empty_payload() {
        assert_eq!(first_line_preview("", 200), "");
    }

    #[test]
    fn tail_keeps_the_end() {
        let out = tail_bytes("0123456789", 4);
        assert!(out.ends_with("6789"));
        assert!(out.starts_with("[truncated: 10 bytes]"));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        let input = "ab🦀🦀";
        let out = tail_bytes(input, 5);
        assert!(out.ends_with("🦀"));
    }
}
