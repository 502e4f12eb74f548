//! Outbound text formatting shared by all channels: strip HTML, expand emoji shortcodes, trim, cap length.

use regex::Regex;
use std::sync::OnceLock;

const EMOJI_SHORTCODES: &[(&str, &str)] = &[
    ("smile", "😄"),
    ("smiley", "😃"),
    ("grin", "😁"),
    ("wink", "😉"),
    ("blush", "😊"),
    ("heart", "❤️"),
    ("thumbsup", "👍"),
    ("+1", "👍"),
    ("thumbsdown", "👎"),
    ("-1", "👎"),
    ("wave", "👋"),
    ("tada", "🎉"),
    ("fire", "🔥"),
    ("star", "⭐"),
    ("sparkles", "✨"),
    ("rocket", "🚀"),
    ("pray", "🙏"),
    ("clap", "👏"),
    ("ok_hand", "👌"),
    ("eyes", "👀"),
    ("thinking", "🤔"),
    ("check", "✅"),
    ("white_check_mark", "✅"),
    ("x", "❌"),
    ("warning", "⚠️"),
    ("information_source", "ℹ️"),
    ("point_right", "👉"),
    ("calendar", "📅"),
    ("phone", "📞"),
    ("email", "📧"),
    ("shopping_cart", "🛒"),
    ("package", "📦"),
    ("100", "💯"),
];

fn emoji_for(code: &str) -> Option<&'static str> {
    EMOJI_SHORTCODES
        .iter()
        .find(|(name, _)| *name == code)
        .map(|(_, emoji)| *emoji)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&amp;", "&")
}

static BREAK_TAGS: OnceLock<Regex> = OnceLock::new();
static LIST_ITEM_TAGS: OnceLock<Regex> = OnceLock::new();
static ANY_TAG: OnceLock<Regex> = OnceLock::new();
static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();
static SHORTCODE: OnceLock<Regex> = OnceLock::new();

/// Compile a pattern literal on first use.
fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex pattern"))
}

/// Remove HTML markup, keeping line structure from `<br>`, `</p>`, `</li>` and decoding common entities.
pub fn strip_html(text: &str) -> String {
    let with_breaks = cached(&BREAK_TAGS, r"(?i)<br\s*/?>|</p>|</div>|</li>").replace_all(text, "\n");
    let with_bullets = cached(&LIST_ITEM_TAGS, r"(?i)<li[^>]*>").replace_all(&with_breaks, "• ");
    let stripped = cached(&ANY_TAG, r"<[^>]*>").replace_all(&with_bullets, "");
    let decoded = decode_entities(&stripped);
    cached(&BLANK_RUNS, r"\n[ \t]*\n(?:[ \t]*\n)+")
        .replace_all(&decoded, "\n\n")
        .into_owned()
}

/// Replace `:shortcode:` with the emoji; unknown shortcodes are left as written.
pub fn expand_emoji_shortcodes(text: &str) -> String {
    cached(&SHORTCODE, r":([a-z0-9_+\-]+):")
        .replace_all(text, |caps: &regex::Captures| {
            emoji_for(&caps[1])
                .map(str::to_string)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Cut to at most `max_chars` characters on a char boundary, ending with an ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Full outbound pipeline for a reply body. `max_chars` is the platform text limit.
pub fn format_outbound_text(text: &str, max_chars: usize) -> String {
    let text = strip_html(text);
    let text = expand_emoji_shortcodes(&text);
    truncate_chars(text.trim(), max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_compile_once() {
        assert_eq!(expand_emoji_shortcodes(":fire: :fire:"), "🔥 🔥");
        let first = cached(&SHORTCODE, r":([a-z0-9_+\-]+):");
        let second = cached(&SHORTCODE, r":([a-z0-9_+\-]+):");
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn strips_tags_and_keeps_breaks() {
        let html = "<p>Hello <strong>there</strong></p><p>Line&nbsp;two &amp; more</p>";
        assert_eq!(strip_html(html).trim(), "Hello there\nLine two & more");
    }

    #[test]
    fn list_items_become_bullets() {
        let html = "<ul><li>One</li><li>Two</li></ul>";
        assert_eq!(strip_html(html).trim(), "• One\n• Two");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(strip_html("a<br><br><br><br>b"), "a\n\nb");
    }

    #[test]
    fn expands_known_shortcodes_only() {
        assert_eq!(expand_emoji_shortcodes("Hi :wave: :nope:"), "Hi 👋 :nope:");
        assert_eq!(expand_emoji_shortcodes(":+1: done"), "👍 done");
    }

    #[test]
    fn leaves_times_alone() {
        assert_eq!(expand_emoji_shortcodes("open 10:30 to 18:00"), "open 10:30 to 18:00");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héll…");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("unbounded", 0), "unbounded");
    }

    #[test]
    fn format_trims_and_caps() {
        let out = format_outbound_text("  <b>Thanks</b> :tada:  ", 4096);
        assert_eq!(out, "Thanks 🎉");
    }
}
