use std::sync::OnceLock;

use regex::Regex;

fn escape_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // CSI sequences, OSC sequences terminated by BEL or ST, and charset
        // designations such as ESC ( B.
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()][A-Za-z0-9]")
            .expect("valid ansi regex")
    })
}

/// Remove terminal escape sequences from captured pane text.
pub fn strip_ansi(text: &str) -> String {
    if !text.contains('\x1b') {
        return text.to_string();
    }
    escape_regex().replace_all(text, "").into_owned()
}
