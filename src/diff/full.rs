use super::{Cursor, DiffError, UNMERGED, file::FileDiff, file::starts_file};
use std::fmt;

/// A complete git diff containing changes for multiple files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub files: Vec<FileDiff>,
}

impl Diff {
    /// Parse a complete git diff output into file diffs.
    ///
    /// Empty input is an empty diff. Any line that is neither part of a file
    /// header nor of a hunk is an error carrying its line number.
    ///
    /// Unmerged paths (`* Unmerged path` markers and `diff --cc` sections)
    /// are skipped: they cannot be staged by hunk and show up as conflicts
    /// in the status instead.
    pub fn parse(text: &str) -> Result<Self, DiffError> {
        let mut cursor = Cursor::new(text);
        let mut files = Vec::new();

        while let Some(line) = cursor.peek() {
            if line.starts_with(UNMERGED) {
                cursor.next();
                continue;
            }
            if is_combined(line) {
                skip_combined(&mut cursor);
                continue;
            }
            if !starts_file(&cursor) {
                return Err(DiffError::UnexpectedLine {
                    line: cursor.line_no(),
                    text: line.to_string(),
                });
            }
            files.push(FileDiff::parse_next(&mut cursor)?);
        }

        Ok(Diff { files })
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file(&self, path: &str) -> Option<&FileDiff> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn file_mut(&mut self, path: &str) -> Option<&mut FileDiff> {
        self.files.iter_mut().find(|f| f.path == path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }
}

fn is_combined(line: &str) -> bool {
    line.starts_with("diff --cc ") || line.starts_with("diff --combined ")
}

fn skip_combined(cursor: &mut Cursor<'_>) {
    cursor.next();
    while let Some(line) = cursor.peek()
        && !line.starts_with("diff ")
        && !line.starts_with(UNMERGED)
    {
        cursor.next();
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file_diff in &self.files {
            write!(f, "{file_diff}")?;
        }
        Ok(())
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Generate line content
    fn arb_line_content() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::char::range(' ', '~'), 0..20)
            .prop_map(|chars| chars.into_iter().collect())
    }

    fn range(start: u32, count: u32) -> String {
        match count {
            1 => start.to_string(),
            n => format!("{start},{n}"),
        }
    }

    /// Generate hunk text with consistent counts
    fn arb_hunk(start: u32) -> impl Strategy<Value = String> {
        (
            prop::collection::vec((0..3u8, arb_line_content()), 1..8),
            prop::option::of("[a-z ]{1,12}"),
        )
            .prop_map(move |(lines, heading)| {
                let old = lines.iter().filter(|(k, _)| *k != 1).count() as u32;
                let new = lines.iter().filter(|(k, _)| *k != 2).count() as u32;
                let heading = heading.map(|h| format!(" {h}")).unwrap_or_default();
                let mut text = format!("@@ -{} +{} @@{heading}\n", range(start, old), range(start, new));
                for (kind, content) in lines {
                    let marker = ['\u{20}', '+', '-'][usize::from(kind)];
                    text.push(marker);
                    text.push_str(&content);
                    text.push('\n');
                }
                text
            })
    }

    /// Generate a file section with 0-3 hunks
    fn arb_file() -> impl Strategy<Value = String> {
        (
            "[a-z]{1,8}\\.rs",
            prop::collection::vec(arb_hunk(1), 0..=1),
            prop::collection::vec(arb_hunk(100), 0..2),
            any::<bool>(),
        )
            .prop_map(|(path, first, second, no_newline)| {
                let mut text = format!(
                    "diff --git a/{path} b/{path}\nindex 1111111..2222222 100644\n--- a/{path}\n+++ b/{path}\n"
                );
                let hunks: Vec<String> = first.into_iter().chain(second).collect();
                for hunk in &hunks {
                    text.push_str(hunk);
                }
                if no_newline && !hunks.is_empty() {
                    text.push_str("\\ No newline at end of file\n");
                }
                text
            })
    }

    proptest! {
        /// Rendering a parsed diff reproduces its text exactly
        #[test]
        fn diff_text_roundtrips(files in prop::collection::vec(arb_file(), 0..4)) {
            let text = files.concat();
            let diff = Diff::parse(&text);
            prop_assert!(diff.is_ok(), "Failed to parse:\n{}\n{:?}", text, diff);
            prop_assert_eq!(diff.unwrap().to_string(), text);
        }
    }
}
