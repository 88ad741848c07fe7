//! `{{PLACEHOLDER}}` rendering for agent system messages.
//!
//! Lookup precedence: the settings placeholder table (upper-case key,
//! then snake-case), well-known settings fields, then the process
//! environment. An unresolved placeholder stays in the text unchanged
//! and is logged, so a missing value is visible instead of silently
//! blank.

use parley_types::Settings;
use tracing::{debug, warn};

/// Render all `{{KEY}}` tokens in `text`.
///
/// A key is one or more of `A-Z`, `0-9`, `_`. Anything else between
/// braces is left untouched.
pub fn render_placeholders(text: &str, settings: &Settings) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];

        if !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
        {
            match settings.placeholder_value(key) {
                Some(value) => {
                    debug!(key, "prompt placeholder rendered");
                    out.push_str(&value);
                }
                None => {
                    warn!(key, "prompt placeholder unresolved");
                    out.push_str("{{");
                    out.push_str(key);
                    out.push_str("}}");
                }
            }
        } else {
            // Not a placeholder key; keep the braces literally.
            out.push_str("{{");
            out.push_str(key);
            out.push_str("}}");
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(key: &str, value: &str) -> Settings {
        let mut s = Settings::default();
        s.placeholders.insert(key.into(), value.into());
        s
    }

    #[test]
    fn renders_known_placeholder() {
        let s = settings_with("NOTES_PARENT_PAGE_ID", "page-42");
        let out = render_placeholders("Create under {{NOTES_PARENT_PAGE_ID}}.", &s);
        assert_eq!(out, "Create under page-42.");
    }

    #[test]
    fn unresolved_placeholder_kept() {
        let s = Settings::default();
        let out = render_placeholders("Use {{TOTALLY_UNKNOWN_KEY_99}} here", &s);
        assert_eq!(out, "Use {{TOTALLY_UNKNOWN_KEY_99}} here");
    }

    #[test]
    fn multiple_placeholders() {
        let mut s = settings_with("A_KEY", "1");
        s.placeholders.insert("B_KEY".into(), "2".into());
        let out = render_placeholders("{{A_KEY}} and {{B_KEY}} and {{A_KEY}}", &s);
        assert_eq!(out, "1 and 2 and 1");
    }

    #[test]
    fn lowercase_braces_not_treated_as_placeholder() {
        let s = Settings::default();
        let out = render_placeholders("literal {{not_a_key}} stays", &s);
        assert_eq!(out, "literal {{not_a_key}} stays");
    }

    #[test]
    fn unterminated_braces_kept() {
        let s = Settings::default();
        assert_eq!(render_placeholders("broken {{KEY", &s), "broken {{KEY");
    }

    #[test]
    fn empty_text() {
        assert_eq!(render_placeholders("", &Settings::default()), "");
    }
}
