//! Locating work reports in captured pane text.
//!
//! Markers only count when they sit on their own line: a begin marker must
//! end its line and an end marker must start it (leading whitespace and a
//! bullet in front of the begin marker are tolerated). This keeps the
//! single-line echo of a submitted prompt, which quotes both markers inline,
//! from being mistaken for a report.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::terminal::session::PROMPT_GLYPH;
use crate::terminal::strip_ansi;

use super::{REPORT_BEGIN, REPORT_END};

const BULLET: char = '\u{2022}';
const WARNING_GLYPH: char = '\u{26a0}';

/// Headings that open a plain (non-bullet) section report.
const SECTION_HEADINGS: &[&str] = &["summary:", "assessment:"];

fn tagged_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<<WORK_REPORT_(BEGIN|END):([A-Za-z0-9._-]+)>>").expect("valid marker regex")
    })
}

/// Strip ANSI, normalize line endings, and rewrite matched tagged markers.
///
/// Offsets handed to [`extract_delimited_after`] must come from text cleaned
/// the same way.
pub fn clean_capture(raw: &str) -> String {
    let text = normalize_newlines(&strip_ansi(raw));
    normalize_tagged_markers(&text).into_owned()
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// Replace `<<WORK_REPORT_BEGIN:id>>` / `<<WORK_REPORT_END:id>>` pairs with
/// the plain markers. Each end pairs with the nearest open begin carrying the
/// same id; unpaired tagged markers are left untouched.
pub fn normalize_tagged_markers(text: &str) -> Cow<'_, str> {
    if !text.contains("<<WORK_REPORT_BEGIN:") {
        return Cow::Borrowed(text);
    }
    let mut open: HashMap<&str, Vec<Range<usize>>> = HashMap::new();
    let mut replacements: Vec<(Range<usize>, &str)> = Vec::new();
    for caps in tagged_marker_regex().captures_iter(text) {
        let (Some(whole), Some(kind), Some(id)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if kind.as_str() == "BEGIN" {
            open.entry(id.as_str()).or_default().push(whole.range());
        } else if let Some(begin) = open.get_mut(id.as_str()).and_then(Vec::pop) {
            replacements.push((begin, REPORT_BEGIN));
            replacements.push((whole.range(), REPORT_END));
        }
    }
    if replacements.is_empty() {
        return Cow::Borrowed(text);
    }
    replacements.sort_by_key(|(range, _)| range.start);
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (range, marker) in replacements {
        out.push_str(&text[cursor..range.start]);
        out.push_str(marker);
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);
    Cow::Owned(out)
}

fn ends_line(text: &str, from: usize) -> bool {
    text[from..]
        .split('\n')
        .next()
        .is_none_or(|rest| rest.trim().is_empty())
}

fn starts_line(text: &str, at: usize) -> bool {
    text[..at]
        .rsplit('\n')
        .next()
        .is_none_or(|head| head.trim().is_empty())
}

fn begin_offsets(text: &str) -> Vec<usize> {
    text.match_indices(REPORT_BEGIN)
        .map(|(i, _)| i)
        .filter(|&i| ends_line(text, i + REPORT_BEGIN.len()))
        .collect()
}

fn end_offsets(text: &str) -> Vec<usize> {
    text.match_indices(REPORT_END)
        .map(|(i, _)| i)
        .filter(|&i| starts_line(text, i))
        .collect()
}

/// Byte offset of the last line-anchored end marker in cleaned text.
pub fn last_end_offset(clean: &str) -> Option<usize> {
    end_offsets(clean).last().copied()
}

/// Body of the last delimited report, trimmed. `None` when there is no
/// complete, non-empty report.
pub fn extract_delimited(output: &str) -> Option<String> {
    let text = normalize_newlines(output);
    extract_delimited_after(&text, None)
}

/// Like [`extract_delimited`], but both markers must lie strictly after
/// `baseline`, the end-marker offset recorded before the prompt was sent.
pub fn extract_delimited_after(clean: &str, baseline: Option<usize>) -> Option<String> {
    let after_baseline = |offset: usize| baseline.is_none_or(|b| offset > b);
    let end = end_offsets(clean)
        .into_iter()
        .filter(|&i| after_baseline(i))
        .last()?;
    let begin = begin_offsets(&clean[..end])
        .into_iter()
        .filter(|&i| after_baseline(i))
        .last()?;
    let body = clean[begin + REPORT_BEGIN.len()..end].trim();
    (!body.is_empty()).then(|| body.to_string())
}

/// Append a synthetic delimited copy of `body` to `output`, so consumers
/// always see the delimited form.
pub fn wrap_report(output: &str, body: &str) -> String {
    let head = output.trim();
    let mut out = String::with_capacity(head.len() + body.len() + 64);
    if !head.is_empty() {
        out.push_str(head);
        out.push('\n');
    }
    out.push_str(REPORT_BEGIN);
    out.push('\n');
    out.push_str(body.trim());
    out.push('\n');
    out.push_str(REPORT_END);
    out
}

struct Segment<'a> {
    prompt: Option<&'a str>,
    lines: Vec<&'a str>,
}

/// Split cleaned text at prompt lines. The first segment holds whatever
/// precedes the first prompt.
fn prompt_segments(clean: &str) -> Vec<Segment<'_>> {
    let mut segments = vec![Segment {
        prompt: None,
        lines: Vec::new(),
    }];
    for line in clean.lines() {
        if let Some(rest) = line.trim_start().strip_prefix(PROMPT_GLYPH) {
            segments.push(Segment {
                prompt: Some(rest.trim()),
                lines: Vec::new(),
            });
        } else if let Some(segment) = segments.last_mut() {
            segment.lines.push(line);
        }
    }
    segments
}

/// Scrape an undelimited report from the output of the most recent prompt.
///
/// Looks at segments from the one echoing the last submitted input onward,
/// newest first. In each it takes the last non-transient `•` block, or else
/// a plain section report opened by a known heading. A trailing
/// "worked for" status line is appended when present.
pub fn extract_fallback(clean: &str) -> Option<String> {
    let segments = prompt_segments(clean);
    let first = segments
        .iter()
        .rposition(|s| s.prompt.is_some_and(|p| !p.is_empty()))
        .unwrap_or(0);
    let candidates = &segments[first..];

    let worked = candidates
        .iter()
        .flat_map(|s| s.lines.iter())
        .rev()
        .map(|line| line.trim())
        .find(|line| line.to_lowercase().contains("worked for"));

    let body = candidates
        .iter()
        .rev()
        .find_map(|s| bullet_block(&s.lines).or_else(|| section_block(&s.lines)))?;
    match worked {
        Some(status) if !body.contains(status) => Some(format!("{body}\n{status}")),
        _ => Some(body),
    }
}

fn is_bullet_line(core: &str) -> bool {
    core == "\u{2022}" || core.starts_with("\u{2022} ")
}

fn is_stop_line(core: &str) -> bool {
    core.starts_with(WARNING_GLYPH) || core.starts_with("Tip:") || core.starts_with(PROMPT_GLYPH)
}

fn is_transient_head(first: &str) -> bool {
    let head = first.trim().trim_start_matches(BULLET).trim();
    head.starts_with("Working")
        || head.starts_with("Starting MCP")
        || head.to_lowercase().contains("esc to interrupt")
}

fn bullet_block(lines: &[&str]) -> Option<String> {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in lines {
        let core = line.trim();
        if core.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        if is_stop_line(core) {
            break;
        }
        if is_bullet_line(core) || !current.is_empty() {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
        .iter()
        .rev()
        .find(|block| block.first().is_some_and(|first| !is_transient_head(first)))
        .map(|block| block.join("\n").trim().to_string())
        .filter(|body| !body.is_empty())
}

fn section_block(lines: &[&str]) -> Option<String> {
    let start = lines.iter().position(|line| {
        let core = line.trim().trim_start_matches(BULLET).trim().to_lowercase();
        SECTION_HEADINGS.iter().any(|h| core.starts_with(h))
    })?;
    let mut kept = Vec::new();
    for line in &lines[start..] {
        let core = line.trim();
        if is_stop_line(core) || (is_bullet_line(core) && is_transient_head(core)) {
            break;
        }
        kept.push(line.trim_end());
    }
    let body = kept.join("\n").trim().to_string();
    (!body.is_empty()).then_some(body)
}
