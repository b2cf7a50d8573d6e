// Shared text utilities (used by the controller, views and the Telegram adapter)

use std::time::Duration;

/// Max characters of shell output echoed back to the chat
pub const MAX_OUTPUT_CHARS: usize = 3000;
pub const TRUNCATION_MARKER: &str = "\n...(truncated)";

/// Cut `text` to `max_chars` characters (char-boundary safe), appending the marker if cut.
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}{}", &text[..end], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Wrap command output in a code block; empty output becomes a placeholder.
pub fn code_block(text: &str) -> String {
    let body = if text.trim().is_empty() {
        "(no output)"
    } else {
        text
    };
    // A stray fence inside the output would end the block early
    format!("```\n{}\n```", body.replace("```", "'''"))
}

/// Split text into chunks respecting max_len, trying to break at paragraph/line boundaries
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let search_range = &remaining[..limit];
        let break_point = search_range
            .rfind("\n\n")
            .or_else(|| search_range.rfind('\n'))
            .or_else(|| search_range.rfind(' '))
            .unwrap_or(limit);

        let break_at = if break_point == 0 { limit } else { break_point };

        chunks.push(remaining[..break_at].to_string());
        remaining = remaining[break_at..].trim_start();
    }

    chunks
}

/// `1d 02:03:04` / `02:03:04`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let days = secs / 86_400;
    let hms = format!("{:02}:{:02}:{:02}", (secs % 86_400) / 3600, (secs % 3600) / 60, secs % 60);
    if days > 0 {
        format!("{}d {}", days, hms)
    } else {
        hms
    }
}

/// File size as whole kilobytes, e.g. `2KB`
pub fn format_size_kb(bytes: u64) -> String {
    format!("{}KB", bytes / 1024)
}
