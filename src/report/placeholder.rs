//! Detection of reports that only echo the prompt's report template.

use super::Member;

/// Heading chains as they appear in a template with nothing filled in.
const ACTOR_EMPTY_HEADINGS: &str =
    "summary: changes: validation: open questions: next step for critic:";
const CRITIC_EMPTY_HEADINGS: &str =
    "assessment: risks: required fixes: verification steps: next actor prompt: continue loop:";

const ACTOR_ELLIPSIS_SECTIONS: &[&str] = &["summary: - ...", "changes: - ...", "validation: - ..."];
const CRITIC_ELLIPSIS_SECTIONS: &[&str] = &[
    "assessment: - ...",
    "required fixes: - ...",
    "verification steps: - ...",
    "next actor prompt: - ...",
];

const ACTOR_ANGLE_TOKENS: &[&str] = &["<at least", "<specific", "<what you"];
const CRITIC_ANGLE_TOKENS: &[&str] = &["<yes|no>", "<clear actionable", "<single concrete"];

/// Lowercase with all whitespace runs collapsed to one space.
fn normalize(report: &str) -> String {
    report
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn bullet_body(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    ["- ", "* ", "\u{2022} "]
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
}

/// Bullets that carry something other than `...`.
fn real_bullet_count(report: &str) -> usize {
    report
        .lines()
        .filter_map(bullet_body)
        .filter(|body| !body.trim().trim_matches('.').trim().is_empty())
        .count()
}

/// Whether `report` is an unfilled copy of the template for `member`.
pub fn looks_like_placeholder(report: &str, member: Member) -> bool {
    let text = normalize(report);
    if text.is_empty() {
        return true;
    }
    let ellipses = text.matches("...").count();
    let bullets = real_bullet_count(report);
    match member {
        Member::Actor => {
            text.contains(ACTOR_EMPTY_HEADINGS)
                || ACTOR_ELLIPSIS_SECTIONS.iter().all(|s| text.contains(s))
                || ACTOR_ANGLE_TOKENS.iter().any(|t| text.contains(t))
                || (ellipses >= 2 && bullets <= 2)
                || (text.contains("summary:") && text.contains("changes:") && bullets < 2)
        }
        Member::Critic => {
            text.contains(CRITIC_EMPTY_HEADINGS)
                || CRITIC_ELLIPSIS_SECTIONS.iter().all(|s| text.contains(s))
                || CRITIC_ANGLE_TOKENS.iter().any(|t| text.contains(t))
                || (ellipses >= 2 && bullets <= 3)
                || (text.contains("assessment:") && text.contains("required fixes:") && bullets < 3)
        }
    }
}
