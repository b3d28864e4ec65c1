//! Parsing of staging targets given on the command line.
//!
//! A target names a file and optionally which of its changes to use:
//!
//! - `FILE` - every change in the file
//! - `FILE#HUNKS` - hunks by 1-based index, e.g. `src/lib.rs#1,3..4`
//! - `FILE:LINES` - individual changed lines, e.g. `flake.nix:10,15,-20`
//!
//! # Line references
//!
//! - `N` - Addition at new line N
//! - `-N` - Deletion at old line N
//! - `N..M` - Range of additions (inclusive)
//! - `-N..-M` - Range of deletions (inclusive)
//!
//! A `:` or `#` only starts a selector when everything after it is a
//! selector, so `notes:v2.txt` is a plain path.
//!
//! ```
//! use gitdeck::parse::{parse_target, LineRef, Selector};
//! use std::num::NonZeroU32;
//!
//! let target = parse_target("file.nix:-10,12").unwrap();
//! assert_eq!(target.path, "file.nix");
//! assert_eq!(target.selector, Selector::Lines(vec![
//!     LineRef::Delete(NonZeroU32::new(10).unwrap()),
//!     LineRef::Add(NonZeroU32::new(12).unwrap()),
//! ]));
//! ```

use error_set::error_set;
use std::num::{NonZeroU32, NonZeroUsize};

error_set! {
    /// Errors from parsing staging targets
    ParseError := {
        /// File name portion before the selector is empty or whitespace
        #[display("Invalid target '{input}': file name cannot be empty")]
        EmptyFileName { input: String },
        /// Selector separator present but nothing after it
        #[display("Invalid target '{input}': no lines or hunks after the separator")]
        EmptyRefs { input: String },
        /// Line number could not be parsed as a valid non-zero u32
        #[display("Invalid line number '{value}'")]
        InvalidLineNumber { value: String },
        /// Hunk index could not be parsed as a 1-based index
        #[display("Invalid hunk index '{value}'")]
        InvalidHunkIndex { value: String },
        /// Range has start greater than end
        #[display("Invalid range {start}..{end}: start must be <= end")]
        InvalidRange { start: u32, end: u32 },
        /// Deletion range end does not start with '-' prefix
        #[display("Delete reference must start with '-', got '{value}'")]
        InvalidDeleteRef { value: String },
    }
}

/// A reference to specific changed lines.
///
/// Additions reference new line numbers, deletions reference old line numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRef {
    /// Addition at new line number
    Add(NonZeroU32),
    /// Addition range (inclusive start and end)
    AddRange(NonZeroU32, NonZeroU32),
    /// Deletion at old line number
    Delete(NonZeroU32),
    /// Deletion range (inclusive start and end)
    DeleteRange(NonZeroU32, NonZeroU32),
}

impl LineRef {
    /// Whether this reference selects the deletion of old line `line`
    pub fn matches_old(&self, line: u32) -> bool {
        match self {
            LineRef::Delete(n) => n.get() == line,
            LineRef::DeleteRange(start, end) => (start.get()..=end.get()).contains(&line),
            _ => false,
        }
    }

    /// Whether this reference selects the addition of new line `line`
    pub fn matches_new(&self, line: u32) -> bool {
        match self {
            LineRef::Add(n) => n.get() == line,
            LineRef::AddRange(start, end) => (start.get()..=end.get()).contains(&line),
            _ => false,
        }
    }
}

/// Which changes of a file a target refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Hunks(Vec<NonZeroUsize>),
    Lines(Vec<LineRef>),
}

/// A file plus a selection of its changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub path: String,
    pub selector: Selector,
}

/// Parse a `FILE`, `FILE#HUNKS` or `FILE:LINES` target.
///
/// # Errors
///
/// Returns [`ParseError`] if the file name is empty or a selector is
/// present but invalid.
pub fn parse_target(input: &str) -> Result<Target, ParseError> {
    let (path, selector) = match split_selector(input, ':') {
        Some((path, refs)) => (path, Selector::Lines(parse_line_refs(input, refs)?)),
        None => match split_selector(input, '#') {
            Some((path, hunks)) => (path, Selector::Hunks(parse_hunk_refs(input, hunks)?)),
            None => (input, Selector::All),
        },
    };

    let path = path.trim();
    if path.is_empty() {
        return Err(ParseError::EmptyFileName {
            input: input.to_string(),
        });
    }

    Ok(Target {
        path: path.to_string(),
        selector,
    })
}

/// Split at the last `separator` if what follows can only be a selector
fn split_selector(input: &str, separator: char) -> Option<(&str, &str)> {
    let (path, refs) = input.rsplit_once(separator)?;
    refs.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '.' | ',' | ' '))
        .then_some((path, refs))
}

/// Parse the line references part (after the colon)
/// Examples: "137", "10..15", "10,15,-20"
fn parse_line_refs(input: &str, refs: &str) -> Result<Vec<LineRef>, ParseError> {
    let refs: Vec<LineRef> = refs
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_single_ref)
        .collect::<Result<_, _>>()?;

    if refs.is_empty() {
        return Err(ParseError::EmptyRefs {
            input: input.to_string(),
        });
    }
    Ok(refs)
}

/// Parse a single line reference (could be single number, range, or deletion)
fn parse_single_ref(input: &str) -> Result<LineRef, ParseError> {
    let deletion = input.starts_with('-');
    let Some((start, end)) = input.split_once("..") else {
        return Ok(if deletion {
            LineRef::Delete(parse_delete_number(input)?)
        } else {
            LineRef::Add(parse_number(input)?)
        });
    };

    let (start, end) = if deletion {
        (parse_delete_number(start)?, parse_delete_number(end)?)
    } else {
        (parse_number(start)?, parse_number(end)?)
    };
    if start > end {
        return Err(ParseError::InvalidRange {
            start: start.get(),
            end: end.get(),
        });
    }
    Ok(if deletion {
        LineRef::DeleteRange(start, end)
    } else {
        LineRef::AddRange(start, end)
    })
}

/// Parse a positive line number (for additions)
fn parse_number(input: &str) -> Result<NonZeroU32, ParseError> {
    input
        .parse::<NonZeroU32>()
        .map_err(|_| ParseError::InvalidLineNumber {
            value: input.to_string(),
        })
}

/// Parse a negative line number (for deletions)
fn parse_delete_number(input: &str) -> Result<NonZeroU32, ParseError> {
    let Some(digits) = input.strip_prefix('-') else {
        return Err(ParseError::InvalidDeleteRef {
            value: input.to_string(),
        });
    };
    digits
        .parse::<NonZeroU32>()
        .map_err(|_| ParseError::InvalidLineNumber {
            value: input.to_string(),
        })
}

/// Parse 1-based hunk indices: "1", "2,4", "1..3"
fn parse_hunk_refs(input: &str, refs: &str) -> Result<Vec<NonZeroUsize>, ParseError> {
    let index = |value: &str| {
        value
            .parse::<NonZeroUsize>()
            .map_err(|_| ParseError::InvalidHunkIndex {
                value: value.to_string(),
            })
    };

    let mut hunks = Vec::new();
    for part in refs.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once("..") {
            Some((start, end)) => {
                let (start, end) = (index(start)?, index(end)?);
                if start > end {
                    return Err(ParseError::InvalidRange {
                        start: u32::try_from(start.get()).unwrap_or(u32::MAX),
                        end: u32::try_from(end.get()).unwrap_or(u32::MAX),
                    });
                }
                hunks.extend((start.get()..=end.get()).filter_map(NonZeroUsize::new));
            }
            None => hunks.push(index(part)?),
        }
    }

    if hunks.is_empty() {
        return Err(ParseError::EmptyRefs {
            input: input.to_string(),
        });
    }
    hunks.sort_unstable();
    hunks.dedup();
    Ok(hunks)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    fn nz(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    fn hunk(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn lines(input: &str) -> Vec<LineRef> {
        match parse_target(input).unwrap().selector {
            Selector::Lines(refs) => refs,
            other => panic!("expected line refs, got {other:?}"),
        }
    }

    #[test]
    fn parse_whole_file() {
        let target = parse_target("src/main.rs").unwrap();
        assert_eq!(target.path, "src/main.rs");
        assert_eq!(target.selector, Selector::All);
    }

    #[test]
    fn parse_colon_inside_path_is_not_a_selector() {
        let target = parse_target("notes:v2.txt").unwrap();
        assert_eq!(target.path, "notes:v2.txt");
        assert_eq!(target.selector, Selector::All);
    }

    #[test]
    fn parse_single_addition() {
        assert_eq!(lines("flake.nix:137"), vec![LineRef::Add(nz(137))]);
    }

    #[test]
    fn parse_addition_range() {
        assert_eq!(lines("flake.nix:39..43"), vec![LineRef::AddRange(nz(39), nz(43))]);
    }

    #[test]
    fn parse_deletion_range() {
        assert_eq!(lines("gtk.nix:-10..-11"), vec![LineRef::DeleteRange(nz(10), nz(11))]);
    }

    #[test]
    fn parse_mixed_refs() {
        assert_eq!(
            lines("gtk.nix:-10, -11,12..13"),
            vec![
                LineRef::Delete(nz(10)),
                LineRef::Delete(nz(11)),
                LineRef::AddRange(nz(12), nz(13)),
            ]
        );
    }

    #[test]
    fn parse_hunk_indices() {
        let target = parse_target("src/lib.rs#3,1..2,3").unwrap();
        assert_eq!(target.path, "src/lib.rs");
        assert_eq!(
            target.selector,
            Selector::Hunks(vec![hunk(1), hunk(2), hunk(3)])
        );
    }

    #[test]
    fn parse_zero_hunk_index() {
        let result = parse_target("f#0");
        assert!(matches!(result, Err(ParseError::InvalidHunkIndex { .. })));
    }

    #[test]
    fn parse_empty_refs() {
        let result = parse_target("file.nix:");
        assert!(matches!(result, Err(ParseError::EmptyRefs { .. })));
        let result = parse_target("file.nix#,");
        assert!(matches!(result, Err(ParseError::EmptyRefs { .. })));
    }

    #[test]
    fn parse_empty_file_name() {
        let result = parse_target("  :10..15");
        assert!(matches!(result, Err(ParseError::EmptyFileName { .. })));
    }

    #[test]
    fn parse_zero_line_numbers() {
        for input in ["file.nix:0", "file.nix:-0", "file.nix:0..10", "file.nix:10..0"] {
            let result = parse_target(input);
            assert!(
                matches!(result, Err(ParseError::InvalidLineNumber { .. })),
                "{input}: {result:?}"
            );
        }
    }

    #[test]
    fn parse_mixed_sign_range() {
        let result = parse_target("file.nix:-10..12");
        assert!(matches!(result, Err(ParseError::InvalidDeleteRef { .. })));
    }

    #[test]
    fn parse_inverted_ranges() {
        assert!(matches!(
            parse_target("file.nix:15..10"),
            Err(ParseError::InvalidRange { start: 15, end: 10 })
        ));
        assert!(matches!(
            parse_target("file.nix:-15..-10"),
            Err(ParseError::InvalidRange { start: 15, end: 10 })
        ));
    }

    #[test]
    fn line_refs_match_their_side_only() {
        let refs = lines("f:3,-5..-7");
        assert!(refs[0].matches_new(3));
        assert!(!refs[0].matches_old(3));
        assert!(refs[1].matches_old(6));
        assert!(!refs[1].matches_old(8));
        assert!(!refs[1].matches_new(6));
    }
}
