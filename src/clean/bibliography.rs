//! Bottom-up bibliography boundary scanner.
//!
//! Lines are classified from the end of the document upward. A run of
//! `min_ref_lines` reference-like lines arms the scanner; while armed each
//! further reference line moves the cut boundary up, and `max_nonmatch_lines`
//! ordinary lines in a row end the scan. Blank lines never change state.
//!
//! | State | Line | Next |
//! |-------|------|------|
//! | `Seeking{k}` | reference | `Armed{0}` (boundary := line) if k+1 ≥ min, else `Seeking{k+1}` |
//! | `Seeking{k}` | other | `Seeking{0}` |
//! | `Armed{j}` | reference | `Armed{0}`, boundary := line |
//! | `Armed{j}` | other | `Cooldown` if j+1 ≥ max, else `Armed{j+1}` |
//! | `Cooldown` | any | stop |

use regex::Regex;
use std::sync::LazyLock;

/// Reference-line shapes, each anchored at the start of the line after optional whitespace.
const REFERENCE_PATTERNS: &[(&str, &str)] = &[
    ("bracket_number", r"\[\d+\]"),
    ("journal_marker", r"(?i)\[J\]\.?"),
    ("monograph_marker", r"(?i)\[M\]\.?"),
    ("enumerated", r"\d{1,4}[\.）]\s+"),
    ("year_volume", r"\d{4}(?:年|;)\s*\d+"),
    ("year_page", r"\d{4}[:,]\d{1,4}"),
    ("doi", r"(?i)doi[:：]\S+"),
    ("url", r"(?i)https?://\S+"),
    // `LindholmLH,CarlbergB,`: surname glued to initials, then another author.
    (
        "compact_author_list",
        r"[A-Z][A-Za-z'\-]*[a-z][A-Z]{1,3},\s?[A-Z][A-Za-z'\-]*[a-z][A-Z]{1,3}\b",
    ),
    ("capitalized_title", r"[A-Z][A-Za-z0-9\-’&, ]{10,}\.\s+[A-Z]"),
    (
        "cjk_author_list",
        r"[\x{4e00}-\x{9fa5}]{2,}(?:,|，|、).{5,}?[\.。]\s*[\x{4e00}-\x{9fa5}A-Za-z]",
    ),
    (
        "journal_year_volume_pages",
        r".+?,\s*\d{4},\s*\d{1,4}:\d{1,5}(?:-\d{1,5})?",
    ),
];

static REFERENCE_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    REFERENCE_PATTERNS
        .iter()
        .map(|(name, pattern)| {
            let re = Regex::new(&format!(r"^\s*(?:{})", pattern)).expect("Invalid reference regex");
            (*name, re)
        })
        .collect()
});

/// Name of the first reference pattern `line` matches, if any.
pub fn reference_pattern(line: &str) -> Option<&'static str> {
    REFERENCE_REGEXES
        .iter()
        .find(|(_, re)| re.is_match(line))
        .map(|(name, _)| *name)
}

pub fn is_reference_line(line: &str) -> bool {
    reference_pattern(line).is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Reference,
    Other,
    Blank,
}

impl LineClass {
    pub fn of(line: &str) -> Self {
        if line.trim().is_empty() {
            LineClass::Blank
        } else if is_reference_line(line) {
            LineClass::Reference
        } else {
            LineClass::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Counting consecutive reference lines from the bottom.
    Seeking { matched: usize },
    /// Bibliography found; counting consecutive ordinary lines above it.
    Armed { nonmatch: usize },
    /// Enough ordinary lines seen; the boundary is final.
    Cooldown,
}

/// Result of feeding one line to the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: ScanState,
    /// The current line becomes the cut boundary.
    pub move_boundary: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct BibliographyScanner {
    pub min_ref_lines: usize,
    pub max_nonmatch_lines: usize,
}

impl Default for BibliographyScanner {
    fn default() -> Self {
        Self {
            min_ref_lines: 2,
            max_nonmatch_lines: 7,
        }
    }
}

impl BibliographyScanner {
    pub fn new(min_ref_lines: usize, max_nonmatch_lines: usize) -> Self {
        Self {
            min_ref_lines: min_ref_lines.max(1),
            max_nonmatch_lines: max_nonmatch_lines.max(1),
        }
    }

    pub fn step(&self, state: ScanState, class: LineClass) -> Transition {
        let stay = Transition {
            next: state,
            move_boundary: false,
        };
        match (state, class) {
            (_, LineClass::Blank) | (ScanState::Cooldown, _) => stay,
            (ScanState::Seeking { matched }, LineClass::Reference) => {
                let matched = matched + 1;
                if matched >= self.min_ref_lines {
                    Transition {
                        next: ScanState::Armed { nonmatch: 0 },
                        move_boundary: true,
                    }
                } else {
                    Transition {
                        next: ScanState::Seeking { matched },
                        move_boundary: false,
                    }
                }
            }
            (ScanState::Seeking { .. }, LineClass::Other) => Transition {
                next: ScanState::Seeking { matched: 0 },
                move_boundary: false,
            },
            (ScanState::Armed { .. }, LineClass::Reference) => Transition {
                next: ScanState::Armed { nonmatch: 0 },
                move_boundary: true,
            },
            (ScanState::Armed { nonmatch }, LineClass::Other) => {
                let nonmatch = nonmatch + 1;
                let next = if nonmatch >= self.max_nonmatch_lines {
                    ScanState::Cooldown
                } else {
                    ScanState::Armed { nonmatch }
                };
                Transition {
                    next,
                    move_boundary: false,
                }
            }
        }
    }

    /// Index of the first line of the trailing bibliography, or `None` when the
    /// scanner never armed.
    pub fn find_boundary<S: AsRef<str>>(&self, lines: &[S]) -> Option<usize> {
        let mut state = ScanState::Seeking { matched: 0 };
        let mut boundary = None;
        for (idx, line) in lines.iter().enumerate().rev() {
            let line = line.as_ref();
            let class = LineClass::of(line);
            let transition = self.step(state, class);
            if transition.move_boundary {
                tracing::trace!(line = idx, pattern = ?reference_pattern(line), "Reference boundary moved");
                boundary = Some(idx);
            }
            state = transition.next;
            if state == ScanState::Cooldown {
                break;
            }
        }
        boundary
    }

    /// Drop everything from the bibliography boundary to the end of `text`.
    pub fn strip(&self, text: &str) -> String {
        let lines: Vec<&str> = text.split('\n').collect();
        match self.find_boundary(&lines) {
            Some(boundary) => {
                tracing::debug!(
                    removed_lines = lines.len() - boundary,
                    "Stripped trailing bibliography"
                );
                lines[..boundary].join("\n")
            }
            None => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "Results\nThe method improves recall on every benchmark\nwe tried and generalises well";

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(REFERENCE_REGEXES.len(), REFERENCE_PATTERNS.len());
    }

    #[test]
    fn classifies_common_reference_shapes() {
        assert_eq!(
            reference_pattern("[1] Smith J. Title. Journal, 2020:12-20"),
            Some("bracket_number")
        );
        assert_eq!(reference_pattern("doi:10.1000/xyz123"), Some("doi"));
        assert_eq!(reference_pattern("  https://example.org/paper"), Some("url"));
        assert_eq!(reference_pattern("2020;22(3):100-110"), Some("year_volume"));
        assert!(is_reference_line("王继光,谢良地,牟建军,等.独特的研究方法"));
        assert!(is_reference_line("Hypertension, 2019, 73:1-10"));
        assert_eq!(
            reference_pattern("LindholmLH,CarlbergB,SamuelssonO.Atenolol in hypertension"),
            Some("compact_author_list")
        );
        assert!(!is_reference_line("the method improves recall"));
    }

    #[test]
    fn leading_word_and_comma_is_prose() {
        for line in [
            "However, results vary by region.",
            "Moreover, the effect persists in winter.",
            "In 2020, the survey was repeated.",
            "Finally, we thank the field teams.",
        ] {
            assert!(!is_reference_line(line), "{}", line);
        }
    }

    #[test]
    fn prose_ending_with_comma_openers_is_kept() {
        let text = "Abstract\nWe study rivers in detail.\nHowever, results vary by region.\nMoreover, the effect persists in winter.";
        assert_eq!(BibliographyScanner::default().strip(text), text);

        let text = "Discussion\nThe trend is stable.\nIn 2020, the survey was repeated.\nHowever, coverage was lower.";
        assert_eq!(BibliographyScanner::default().strip(text), text);
    }

    #[test]
    fn two_reference_lines_truncate_at_first() {
        let text = format!(
            "{}\n[1] Smith J. Title. Journal, 2020:12-20\n[2] Doe A. Another title. Journal, 2021:1-9",
            BODY
        );
        let stripped = BibliographyScanner::default().strip(&text);
        assert_eq!(stripped, BODY);
    }

    #[test]
    fn single_reference_line_is_below_threshold() {
        let text = format!("{}\n[1] Smith J. Title. Journal, 2020:12-20", BODY);
        let stripped = BibliographyScanner::default().strip(&text);
        assert_eq!(stripped, text);
    }

    #[test]
    fn blank_lines_do_not_break_a_run() {
        let text = format!("{}\n\n[1] First ref.\n\n[2] Second ref.\n", BODY);
        let scanner = BibliographyScanner::default();
        let lines: Vec<&str> = text.split('\n').collect();
        assert_eq!(scanner.find_boundary(&lines), Some(4));
    }

    #[test]
    fn seeking_resets_on_ordinary_line() {
        let text = "[1] Stray ref.\nplain body line\n[2] Another stray.";
        let stripped = BibliographyScanner::default().strip(text);
        assert_eq!(stripped, text);
    }

    #[test]
    fn cooldown_fixes_boundary() {
        // An isolated reference far above the bibliography is not pulled in.
        let mut lines = vec!["[9] early citation-like line"];
        lines.extend(["plain prose"; 7]);
        lines.push("[1] Ref one.");
        lines.push("[2] Ref two.");
        let scanner = BibliographyScanner::default();
        assert_eq!(scanner.find_boundary(&lines), Some(8));

        let with_six: Vec<&str> = std::iter::once("[9] early citation-like line")
            .chain(["plain prose"; 6])
            .chain(["[1] Ref one.", "[2] Ref two."])
            .collect();
        assert_eq!(scanner.find_boundary(&with_six), Some(0));
    }

    #[test]
    fn step_table() {
        let scanner = BibliographyScanner::new(2, 2);
        let seeking0 = ScanState::Seeking { matched: 0 };

        let t = scanner.step(seeking0, LineClass::Reference);
        assert_eq!(t.next, ScanState::Seeking { matched: 1 });
        assert!(!t.move_boundary);

        let t = scanner.step(t.next, LineClass::Reference);
        assert_eq!(t.next, ScanState::Armed { nonmatch: 0 });
        assert!(t.move_boundary);

        let t = scanner.step(t.next, LineClass::Other);
        assert_eq!(t.next, ScanState::Armed { nonmatch: 1 });
        let t = scanner.step(t.next, LineClass::Blank);
        assert_eq!(t.next, ScanState::Armed { nonmatch: 1 });
        let t = scanner.step(t.next, LineClass::Other);
        assert_eq!(t.next, ScanState::Cooldown);

        let t = scanner.step(ScanState::Seeking { matched: 1 }, LineClass::Other);
        assert_eq!(t.next, seeking0);
    }
}
