//! Text cleaner.
//!
//! Five stages, always applied in this order:
//!
//! 1. [`unify_whitespace`]: exotic spaces and stray control characters become
//!    plain spaces, runs of spaces collapse.
//! 2. [`normalize_lines`]: paragraph breaks are kept, wrapped lines are
//!    reflowed, hyphen-split words are rejoined.
//! 3. [`strip_preamble`]: author/affiliation lines before the first
//!    front-matter, abstract or introduction heading are dropped.
//! 4. [`bibliography::BibliographyScanner`]: the trailing reference list is
//!    dropped.
//! 5. [`residual_cleanup`]: footnote markers and page-number lines go.
//!
//! [`clean`] runs the stages over one text. [`clean_units`] cleans a whole
//! loaded document: stages 1, 2 and 5 run per unit, while stages 3 and 4 see
//! the document as one line sequence so a preamble or bibliography spanning
//! several pages is removed as a whole.

pub mod bibliography;

use regex::Regex;
use std::sync::LazyLock;

use crate::config::CleaningConfig;
use crate::models::TextUnit;
use bibliography::BibliographyScanner;

static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| compile(r" {2,}"));
static BREAK_RUN: LazyLock<Regex> = LazyLock::new(|| compile(r"\n{3,}"));
static HYPHEN_BREAK: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(\p{L})-[ \t]*\n[ \t]*(\p{L})"));
static REFERENCE_START: LazyLock<Regex> = LazyLock::new(|| compile(r"^\[\d+\]"));
static SECTION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)^(?:\d+(?:\.\d+)*\.?\s*)?(?:abstract|introduction|preface|foreword|contents|table of contents|references|bibliography|keywords?|摘\s*要|引\s*言|前\s*言|目\s*录|参考文献|关键词)\s*[:：]?$",
    )
});
static FRONT_MATTER: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)^\s*(?:前\s*言|目\s*录|table of contents\b|contents\s*$|preface\b|foreword\b)")
});
static CONTENT_START: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\babstract\b|\bintroduction\b|摘\s*要|引\s*言"));
static FOOTNOTE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"[ \t]*\[\d+(?:\s*[,\-–]\s*\d+)*\]"));
static PAGE_NUMBER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)^\s*(?:page\s*\d+(?:\s*of\s*\d+)?|第\s*\d+\s*页|-\s*\d+\s*-|\d+)\s*$")
});

/// Characters that end a sentence; a line ending in one keeps its line break.
const SENTENCE_ENDERS: &[char] = &['。', '！', '？', '.', '!', '?'];

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("Invalid cleaner regex")
}

/// Stage 1.
pub fn unify_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{200B}' | '\u{FEFF}' => {}
            '\r' | '\u{2028}' | '\u{2029}' => out.push('\n'),
            '\u{3000}' | '\u{00A0}' | '\u{2002}'..='\u{200A}' | '\u{202F}' | '\u{205F}' => {
                out.push(' ')
            }
            '\n' => out.push('\n'),
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    SPACE_RUN.replace_all(&out, " ").into_owned()
}

fn trim_lines(text: &str) -> String {
    text.split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stage 2.
///
/// A single line break is replaced by a space unless the line before it is
/// empty, ends with sentence punctuation or is a section heading, or the line
/// after it is empty or opens with a bracketed reference number.
pub fn normalize_lines(text: &str) -> String {
    let text = trim_lines(text);
    let text = BREAK_RUN.replace_all(&text, "\n\n");
    let text = HYPHEN_BREAK.replace_all(&text, "$1$2");

    let lines: Vec<&str> = text.split('\n').collect();
    let mut out = String::with_capacity(text.len());
    for (idx, line) in lines.iter().enumerate() {
        out.push_str(line);
        let Some(next) = lines.get(idx + 1) else {
            break;
        };
        let keep_break = line.is_empty()
            || next.is_empty()
            || line.ends_with(SENTENCE_ENDERS)
            || SECTION_HEADING.is_match(line)
            || REFERENCE_START.is_match(next);
        out.push(if keep_break { '\n' } else { ' ' });
    }

    let out = SPACE_RUN.replace_all(&out, " ");
    trim_lines(&out)
}

/// Index of the line where real content starts, if a marker is found.
pub fn content_start<S: AsRef<str>>(lines: &[S]) -> Option<usize> {
    lines
        .iter()
        .position(|l| FRONT_MATTER.is_match(l.as_ref()))
        .or_else(|| {
            lines
                .iter()
                .position(|l| CONTENT_START.is_match(l.as_ref()))
        })
}

/// Stage 3. Returns `text` unchanged when no start marker is present.
pub fn strip_preamble(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    match content_start(&lines) {
        Some(idx) if idx > 0 => {
            tracing::debug!(removed_lines = idx, marker = lines[idx].trim(), "Stripped preamble");
            lines[idx..].join("\n")
        }
        _ => text.to_string(),
    }
}

/// Stage 5.
pub fn residual_cleanup(text: &str) -> String {
    let text = FOOTNOTE_MARKER.replace_all(text, "");
    let kept: Vec<&str> = text
        .split('\n')
        .filter(|line| !PAGE_NUMBER_LINE.is_match(line))
        .map(str::trim_end)
        .collect();
    let text = kept.join("\n");
    let text = BREAK_RUN.replace_all(&text, "\n\n");
    let text = SPACE_RUN.replace_all(&text, " ");
    text.trim().to_string()
}

/// Full pipeline over a single text.
pub fn clean(text: &str, config: &CleaningConfig) -> String {
    let scanner = BibliographyScanner::new(config.min_ref_lines, config.max_nonmatch_lines);
    let text = normalize_lines(&unify_whitespace(text));
    let text = strip_preamble(&text);
    let text = scanner.strip(&text);
    residual_cleanup(&text)
}

/// Clean every unit of one document. Units left empty are dropped; metadata is kept.
///
/// With `config.enabled == false` units only have surrounding whitespace trimmed.
pub fn clean_units(units: Vec<TextUnit>, config: &CleaningConfig) -> Vec<TextUnit> {
    if !config.enabled {
        return units
            .into_iter()
            .filter_map(|mut unit| {
                unit.text = unit.text.trim().to_string();
                (!unit.text.is_empty()).then_some(unit)
            })
            .collect();
    }

    let normalized: Vec<String> = units
        .iter()
        .map(|u| normalize_lines(&unify_whitespace(&u.text)))
        .collect();

    // (unit index, line) across the whole document.
    let mut lines: Vec<(usize, &str)> = normalized
        .iter()
        .enumerate()
        .flat_map(|(idx, text)| text.split('\n').map(move |line| (idx, line)))
        .collect();

    let texts: Vec<&str> = lines.iter().map(|(_, l)| *l).collect();
    let start = match content_start(&texts) {
        Some(idx) => {
            if idx > 0 {
                tracing::debug!(removed_lines = idx, "Stripped preamble");
            }
            idx
        }
        None => 0,
    };

    let scanner = BibliographyScanner::new(config.min_ref_lines, config.max_nonmatch_lines);
    let end = scanner
        .find_boundary(&texts[start..])
        .map(|b| start + b)
        .unwrap_or(texts.len());
    if end < texts.len() {
        tracing::debug!(removed_lines = texts.len() - end, "Stripped trailing bibliography");
    }
    lines.truncate(end);
    lines.drain(..start);

    let mut per_unit: Vec<Vec<&str>> = vec![Vec::new(); units.len()];
    for (idx, line) in lines {
        per_unit[idx].push(line);
    }

    units
        .into_iter()
        .zip(per_unit)
        .filter_map(|(unit, unit_lines)| {
            let text = residual_cleanup(&unit_lines.join("\n"));
            (!text.is_empty()).then(|| TextUnit {
                text,
                metadata: unit.metadata,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unify_whitespace() {
        let input = "a\u{3000}b\u{00A0}c\u{2003}d\te\u{200B}f   g\r\nh";
        assert_eq!(unify_whitespace(input), "a b c d ef g\nh");
    }

    #[test]
    fn test_reflow_keeps_paragraphs_and_sentence_ends() {
        let input = "This line wraps\nin the middle.\nNew sentence line\n\n\n\nSecond paragraph.";
        assert_eq!(
            normalize_lines(input),
            "This line wraps in the middle.\nNew sentence line\n\nSecond paragraph."
        );
    }

    #[test]
    fn test_hyphen_rejoin() {
        assert_eq!(normalize_lines("an exam-\nple of text"), "an example of text");
    }

    #[test]
    fn test_reference_numbers_keep_their_line() {
        let input = "References\n[1] Smith J. Title\n[2] Doe A. Other";
        assert_eq!(normalize_lines(input), input);
    }

    #[test]
    fn test_preamble_removed() {
        let input = "John Smith, Jane Doe\nUniversity X\n\nAbstract\nThis paper studies...";
        assert_eq!(strip_preamble(input), "Abstract\nThis paper studies...");
    }

    #[test]
    fn test_closing_prose_is_not_a_bibliography() {
        let input = "Abstract\nWe study rivers in detail.\nHowever, results vary by region.\nMoreover, the effect persists in winter.";
        let cleaned = clean(input, &CleaningConfig::default());
        assert!(cleaned.contains("However, results vary by region."), "got {cleaned:?}");
        assert!(cleaned.ends_with("Moreover, the effect persists in winter."), "got {cleaned:?}");
    }

    #[test]
    fn test_preamble_survives_full_pipeline() {
        let input = "John Smith, Jane Doe\nUniversity X\n\nAbstract\nThis paper studies...";
        let cleaned = clean(input, &CleaningConfig::default());
        assert!(
            cleaned.starts_with("Abstract\nThis paper studies..."),
            "got {cleaned:?}"
        );
    }

    #[test]
    fn test_front_matter_preferred_over_abstract() {
        let input = "Some Author\nAbstract mention in a byline\n目录\n第一章";
        assert_eq!(strip_preamble(input), "目录\n第一章");
    }

    #[test]
    fn test_no_marker_leaves_text() {
        let input = "Just a note\nwith two lines";
        assert_eq!(strip_preamble(input), input);
    }

    #[test]
    fn test_residual_cleanup() {
        let input = "Claim one [1] and two [2,3].\n12\nPage 4\n- 5 -\n第 6 页\n\n\n\nTail  text";
        assert_eq!(residual_cleanup(input), "Claim one and two.\n\nTail text");
    }

    #[test]
    fn test_clean_units_spans_pages() {
        let units = vec![
            TextUnit::new("Author Name\nSome Institute").with_meta("page", 1),
            TextUnit::new("Introduction\nBody text here.").with_meta("page", 2),
            TextUnit::new("More body text.\n[1] Ref one. Journal, 2020:1-2").with_meta("page", 3),
            TextUnit::new("[2] Ref two. Journal, 2021:3-4\n[3] Ref three.").with_meta("page", 4),
        ];
        let cleaned = clean_units(units, &CleaningConfig::default());

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].text, "Introduction\nBody text here.");
        assert_eq!(cleaned[0].metadata["page"], 2);
        assert_eq!(cleaned[1].text, "More body text.");
    }

    #[test]
    fn test_disabled_cleaning_only_trims() {
        let config = CleaningConfig {
            enabled: false,
            ..CleaningConfig::default()
        };
        let units = vec![TextUnit::new("  keep [1] as is \n"), TextUnit::new("   ")];
        let cleaned = clean_units(units, &config);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].text, "keep [1] as is");
    }
}
