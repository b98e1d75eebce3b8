use std::sync::LazyLock;

use chrono::{Local, TimeZone};
use regex::Regex;

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    // CSI sequences plus the short two-byte escapes emitted by CLI spinners.
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b[@-Z\\-_]").expect("valid ansi regex")
});

const BOX_GLYPHS: [char; 5] = ['│', '╭', '╮', '╰', '╯'];

pub fn strip_ansi(input: &str) -> String {
    ANSI_RE.replace_all(input, "").into_owned()
}

/// Normalizes one chunk of CLI output: ANSI escapes removed, box-drawing
/// glyphs blanked, whitespace runs collapsed, ends trimmed. Idempotent.
pub fn normalize(input: &str) -> String {
    let stripped = strip_ansi(input);
    let blanked: String = stripped
        .chars()
        .map(|ch| if BOX_GLYPHS.contains(&ch) { ' ' } else { ch })
        .collect();
    blanked.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Renders epoch seconds as a local "Feb 9, 5:32 PM" label. Zero, negative,
/// and out-of-range epochs yield `None` rather than an error.
pub fn format_epoch_label(epoch: i64) -> Option<String> {
    if epoch <= 0 {
        return None;
    }
    let local = Local.timestamp_opt(epoch, 0).single()?;
    Some(local.format("%b %-d, %-I:%M %p").to_string())
}

/// Reads a reset label that may be either free text or epoch seconds.
pub fn reset_label_from_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|ch: char| ",.;:".contains(ch));
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        return match trimmed.parse::<i64>() {
            Ok(epoch) => format_epoch_label(epoch),
            Err(_) => None,
        };
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        if !value.is_finite() || value <= 0.0 {
            return None;
        }
        return format_epoch_label(value as i64);
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_and_box_glyphs() {
        let raw = "\u{1b}[1;32m╭ 5h limit \u{1b}[0m│ 37% left ╯";
        assert_eq!(normalize(raw), "5h limit 37% left");
    }

    #[test]
    fn normalize_is_idempotent() {
        let raw = "  weekly   limit\t 12%  used ";
        let once = normalize(raw);
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("  \t\n"), "");
    }

    #[test]
    fn epoch_label_rejects_non_positive() {
        assert_eq!(format_epoch_label(0), None);
        assert_eq!(format_epoch_label(-5), None);
    }

    #[test]
    fn epoch_label_differs_from_raw_digits() {
        let label = format_epoch_label(1_770_671_532).expect("label");
        assert!(!label.is_empty());
        assert_ne!(label, "1770671532");
    }

    #[test]
    fn reset_label_passes_text_through() {
        assert_eq!(
            reset_label_from_text(" 10:00 PM tomorrow ").as_deref(),
            Some("10:00 PM tomorrow")
        );
        assert_eq!(reset_label_from_text("   "), None);
    }

    #[test]
    fn reset_label_converts_numeric_epoch() {
        let label = reset_label_from_text("1770671532").expect("label");
        assert!(!label.chars().all(|ch| ch.is_ascii_digit()));
    }
}
