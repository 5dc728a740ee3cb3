//! Text clean-up applied to generated content before it is typed.

/// Marker generators append before trailing commentary we never publish.
const CUTOFF_MARKER: &str = "**()";

/// Cut content at the cutoff marker and trim it.
pub fn clean_content(content: &str) -> String {
    let kept = match content.find(CUTOFF_MARKER) {
        Some(idx) => &content[..idx],
        None => content,
    };
    kept.trim().to_string()
}

/// Clean content and drop characters outside the Basic Multilingual Plane.
///
/// ChromeDriver-era key input could not type astral characters; the composer
/// still mangles some of them, so they are removed up front.
pub fn sanitize_text(content: &str) -> String {
    clean_content(content)
        .chars()
        .filter(|c| (*c as u32) < 0xFFFF)
        .collect()
}

/// Remove `@username` mentions (case-insensitive, whole handle only).
pub fn strip_self_mentions(content: &str, username: &str) -> String {
    let username = username.trim_start_matches('@');
    if username.is_empty() {
        return content.trim().to_string();
    }

    let handle: Vec<char> = format!("@{}", username.to_lowercase()).chars().collect();
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut i = 0;

    while i < chars.len() {
        let end = i + handle.len();
        let matches = end <= chars.len()
            && chars[i..end]
                .iter()
                .zip(handle.iter())
                .all(|(a, b)| a.to_lowercase().eq(b.to_lowercase()));
        let at_boundary = end >= chars.len() || !is_handle_char(chars[end]);

        if matches && at_boundary {
            i = end;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }

    collapse_spaces(&out)
}

/// Short prefix of content for log lines.
pub fn preview(content: &str, max_chars: usize) -> String {
    let mut out: String = content.chars().take(max_chars).collect();
    if content.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

fn is_handle_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn collapse_spaces(s: &str) -> String {
    s.split(' ')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_content_cuts_at_marker() {
        assert_eq!(clean_content("  gm frens **() internal notes"), "gm frens");
        assert_eq!(clean_content(" no marker here \n"), "no marker here");
    }

    #[test]
    fn test_sanitize_drops_astral_chars() {
        assert_eq!(sanitize_text("to the moon 🚀!"), "to the moon !");
        assert_eq!(sanitize_text("café ✓"), "café ✓");
    }

    #[test]
    fn test_strip_self_mentions() {
        assert_eq!(
            strip_self_mentions("@Agent47AI thanks @agent47ai!", "agent47ai"),
            "thanks !"
        );
        assert_eq!(
            strip_self_mentions("hi @agent47ai_fan", "agent47ai"),
            "hi @agent47ai_fan"
        );
        assert_eq!(strip_self_mentions(" hello ", ""), "hello");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("hello world", 5), "hello...");
        assert_eq!(preview("hi", 5), "hi");
    }
}
