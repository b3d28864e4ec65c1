pub mod file;
pub mod full;
pub mod hunk;

use error_set::error_set;
use std::fmt::Write as _;

pub use file::{ChangeKind, FileDiff};
pub use full::Diff;
pub use hunk::{DiffLine, Hunk, HunkRange, LineKind};

error_set! {
    /// Errors while reading unified diff text
    DiffError := {
        #[display("Line {line}: malformed hunk header {header:?}")]
        MalformedHunkHeader { line: usize, header: String },
        #[display("Hunk starting on line {line} ends before its announced line counts")]
        TruncatedHunk { line: usize },
        #[display("Line {line}: unexpected line in hunk body {text:?}")]
        UnexpectedHunkLine { line: usize, text: String },
        #[display("Line {line}: expected a file header, found {text:?}")]
        UnexpectedLine { line: usize, text: String },
        #[display("Line {line}: file header names no path")]
        MissingPath { line: usize },
    }
}

/// Marker git prints instead of a diff for a path with conflicts
pub(crate) const UNMERGED: &str = "* Unmerged path ";

/// Line-by-line reader over diff text that remembers line numbers.
///
/// Lines keep any `\r`; only `\n` separates them.
pub(crate) struct Cursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self {
            lines: text.split_terminator('\n').collect(),
            pos: 0,
        }
    }

    pub(crate) fn peek(&self) -> Option<&'a str> {
        self.peek_at(0)
    }

    pub(crate) fn peek_at(&self, offset: usize) -> Option<&'a str> {
        self.lines.get(self.pos + offset).copied()
    }

    /// 1-based number of the line [`Cursor::peek`] would return
    pub(crate) fn line_no(&self) -> usize {
        self.pos + 1
    }

    pub(crate) fn next(&mut self) -> Option<&'a str> {
        let line = self.peek()?;
        self.pos += 1;
        Some(line)
    }
}

/// Format a git diff for user display with hunk indices and line numbers
pub fn format_diff(diff: &Diff) -> String {
    let mut result = String::new();

    for file_diff in &diff.files {
        result.push_str(&file_diff.path);
        match (&file_diff.kind, &file_diff.old_path) {
            (ChangeKind::Renamed, Some(from)) => {
                let _ = write!(result, " (renamed from {from})");
            }
            (ChangeKind::Copied, Some(from)) => {
                let _ = write!(result, " (copied from {from})");
            }
            (ChangeKind::Added, _) => result.push_str(" (new file)"),
            (ChangeKind::Deleted, _) => result.push_str(" (deleted)"),
            _ => {}
        }
        if file_diff.binary {
            result.push_str(" [binary]");
        }
        result.push_str(":\n");

        for (index, hunk) in file_diff.hunks.iter().enumerate() {
            let mark = if hunk.selected { "*" } else { " " };
            let _ = writeln!(
                result,
                " {mark}#{} @@ -{} +{} @@{}",
                index + 1,
                hunk.old,
                hunk.new,
                hunk.heading
            );
            for (old, new, line) in hunk.numbered_lines() {
                match (line.kind, old, new) {
                    (LineKind::Deletion, Some(n), _) => {
                        let _ = writeln!(result, "  -{n}:\t{}", line.content);
                    }
                    (LineKind::Addition, _, Some(n)) => {
                        let _ = writeln!(result, "  +{n}:\t{}", line.content);
                    }
                    _ => {}
                }
            }
            result.push('\n');
        }
    }

    // Remove trailing blank line if present
    if result.ends_with("\n\n") {
        result.pop();
    }

    result
}
