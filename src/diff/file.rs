use super::{Cursor, DiffError, UNMERGED, hunk::Hunk};
use crate::patch::PatchError;
use std::fmt;

/// What happened to a file between the two sides of a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
}

/// A complete diff for a single file.
///
/// Contains the verbatim header lines (`diff --git`, mode and index lines,
/// `---`/`+++`, binary markers) and all hunks for one file. Rendering
/// reproduces the text it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    /// Path on the new side (old side for deletions)
    pub path: String,
    /// Source path of a rename or copy
    pub old_path: Option<String>,
    pub kind: ChangeKind,
    pub binary: bool,
    pub header: Vec<String>,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    /// Parse a single-file diff.
    ///
    /// Accepts both `diff --git` sections and plain `---`/`+++` diffs.
    pub fn parse(text: &str) -> Result<Self, DiffError> {
        let mut cursor = Cursor::new(text);
        match cursor.peek() {
            Some(_) if starts_file(&cursor) => Self::parse_next(&mut cursor),
            Some(line) => Err(DiffError::UnexpectedLine {
                line: 1,
                text: line.to_string(),
            }),
            None => Err(DiffError::MissingPath { line: 1 }),
        }
    }

    /// Parse one file section starting at the cursor.
    pub(crate) fn parse_next(cursor: &mut Cursor<'_>) -> Result<Self, DiffError> {
        let start_line = cursor.line_no();
        let mut header: Vec<String> = Vec::new();
        let Some(first) = cursor.next() else {
            return Err(DiffError::MissingPath { line: start_line });
        };
        let git_style = first.starts_with("diff --git ");
        header.push(first.to_string());

        if git_style {
            while let Some(line) = cursor.peek()
                && !line.starts_with("diff ")
                && !line.starts_with(UNMERGED)
                && !line.starts_with("@@")
            {
                header.push(line.to_string());
                cursor.next();
            }
        } else if let Some(plus) = cursor.next() {
            header.push(plus.to_string());
        }

        let described = describe(&header, git_style);
        let path = described
            .path
            .ok_or(DiffError::MissingPath { line: start_line })?;

        let mut hunks = Vec::new();
        while let Some(line) = cursor.peek()
            && line.starts_with("@@")
        {
            let header_line = cursor.line_no();
            cursor.next();
            hunks.push(Hunk::parse_body(header_line, line, cursor)?);
        }

        Ok(FileDiff {
            path,
            old_path: described.old_path,
            kind: described.kind,
            binary: described.binary,
            header,
            hunks,
        })
    }

    /// Set the selection flag of hunk `index` (0-based).
    pub fn select(&mut self, index: usize, selected: bool) -> Result<(), PatchError> {
        self.hunk_mut(index)?.selected = selected;
        Ok(())
    }

    /// Flip the selection flag of hunk `index`, returning the new state.
    pub fn toggle(&mut self, index: usize) -> Result<bool, PatchError> {
        let hunk = self.hunk_mut(index)?;
        hunk.selected = !hunk.selected;
        Ok(hunk.selected)
    }

    pub fn select_all(&mut self) {
        self.hunks.iter_mut().for_each(|h| h.selected = true);
    }

    pub fn clear_selection(&mut self) {
        self.hunks.iter_mut().for_each(|h| h.selected = false);
    }

    /// Indices of the selected hunks, in order
    pub fn selected_indices(&self) -> Vec<usize> {
        self.hunks
            .iter()
            .enumerate()
            .filter_map(|(i, h)| h.selected.then_some(i))
            .collect()
    }

    /// Same diff text, ignoring selection flags.
    ///
    /// The header carries the blob ids of both sides, so any edit to the
    /// file since the diff was captured shows up here.
    pub fn same_changes(&self, other: &FileDiff) -> bool {
        self.to_string() == other.to_string()
    }

    fn hunk_mut(&mut self, index: usize) -> Result<&mut Hunk, PatchError> {
        let count = self.hunks.len();
        self.hunks
            .get_mut(index)
            .ok_or_else(|| PatchError::HunkOutOfRange {
                path: self.path.clone(),
                index: index + 1,
                count,
            })
    }
}

/// Whether the cursor sits on the first line of a file section
pub(crate) fn starts_file(cursor: &Cursor<'_>) -> bool {
    match cursor.peek() {
        Some(line) if line.starts_with("diff --git ") => true,
        Some(line) if line.starts_with("--- ") => cursor
            .peek_at(1)
            .is_some_and(|next| next.starts_with("+++ ")),
        _ => false,
    }
}

struct Described {
    kind: ChangeKind,
    binary: bool,
    path: Option<String>,
    old_path: Option<String>,
}

fn describe(header: &[String], git_style: bool) -> Described {
    let mut kind = ChangeKind::Modified;
    let mut binary = false;
    let (mut git_a, mut git_b) = (None, None);
    let (mut from, mut to) = (None, None);
    let (mut minus, mut plus) = (None, None);

    for line in header {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            (git_a, git_b) = split_git_paths(rest);
        } else if line.starts_with("new file mode ") {
            kind = ChangeKind::Added;
        } else if line.starts_with("deleted file mode ") {
            kind = ChangeKind::Deleted;
        } else if let Some(p) = line.strip_prefix("rename from ") {
            kind = ChangeKind::Renamed;
            from = Some(unquote(p));
        } else if let Some(p) = line.strip_prefix("rename to ") {
            kind = ChangeKind::Renamed;
            to = Some(unquote(p));
        } else if let Some(p) = line.strip_prefix("copy from ") {
            kind = ChangeKind::Copied;
            from = Some(unquote(p));
        } else if let Some(p) = line.strip_prefix("copy to ") {
            kind = ChangeKind::Copied;
            to = Some(unquote(p));
        } else if let Some(p) = line.strip_prefix("--- ") {
            match header_path(p, git_style) {
                Some(p) => minus = Some(p),
                None if kind == ChangeKind::Modified => kind = ChangeKind::Added,
                None => {}
            }
        } else if let Some(p) = line.strip_prefix("+++ ") {
            match header_path(p, git_style) {
                Some(p) => plus = Some(p),
                None if kind == ChangeKind::Modified => kind = ChangeKind::Deleted,
                None => {}
            }
        } else if line == "GIT binary patch"
            || (line.starts_with("Binary files ") && line.ends_with(" differ"))
        {
            binary = true;
        }
    }

    let path = to.or(plus).or(git_b).or(minus).or(git_a);
    Described {
        kind,
        binary,
        path,
        old_path: from,
    }
}

/// Path from a `---`/`+++` line; `None` for `/dev/null`
fn header_path(raw: &str, strip_prefix: bool) -> Option<String> {
    let path = match split_quoted(raw) {
        Some((quoted, _)) => unquote(quoted),
        None => raw.split('\t').next().unwrap_or(raw).to_string(),
    };
    if path == "/dev/null" {
        return None;
    }
    Some(if strip_prefix {
        strip_side_prefix(&path).to_string()
    } else {
        path
    })
}

fn strip_side_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Both paths of a `diff --git a/X b/Y` line.
///
/// Unquoted paths may themselves contain ` b/`, so prefer the split where
/// both sides name the same file.
fn split_git_paths(rest: &str) -> (Option<String>, Option<String>) {
    if let Some((a, tail)) = split_quoted(rest) {
        let b = tail.strip_prefix(' ').map(unquote);
        return (
            Some(strip_side_prefix(&unquote(a)).to_string()),
            b.map(|b| strip_side_prefix(&b).to_string()),
        );
    }
    if let Some(i) = rest.find(" \"") {
        return (
            Some(strip_side_prefix(&rest[..i]).to_string()),
            Some(strip_side_prefix(&unquote(&rest[i + 1..])).to_string()),
        );
    }

    let splits: Vec<usize> = rest.match_indices(" b/").map(|(i, _)| i).collect();
    let chosen = splits
        .iter()
        .copied()
        .find(|&i| rest[..i].strip_prefix("a/") == Some(&rest[i + 3..]))
        .or_else(|| splits.first().copied());
    match chosen {
        Some(i) => (
            Some(strip_side_prefix(&rest[..i]).to_string()),
            Some(rest[i + 3..].to_string()),
        ),
        None => (None, None),
    }
}

/// Split a leading C-style quoted token from `raw`
fn split_quoted(raw: &str) -> Option<(&str, &str)> {
    if !raw.starts_with('"') {
        return None;
    }
    let mut escaped = false;
    for (i, b) in raw.bytes().enumerate().skip(1) {
        match b {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'"' => return Some((&raw[..=i], &raw[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Undo git's C-style path quoting (`"caf\303\251 \"x\".txt"`)
pub(crate) fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_string();
    };
    let mut bytes = Vec::with_capacity(inner.len());
    let mut input = inner.bytes().peekable();
    while let Some(b) = input.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        match input.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b't') => bytes.push(b'\t'),
            Some(b'r') => bytes.push(b'\r'),
            Some(b'a') => bytes.push(0x07),
            Some(b'b') => bytes.push(0x08),
            Some(b'f') => bytes.push(0x0c),
            Some(b'v') => bytes.push(0x0b),
            Some(digit @ b'0'..=b'7') => {
                let mut value = u32::from(digit - b'0');
                for _ in 0..2 {
                    if let Some(&next @ b'0'..=b'7') = input.peek() {
                        value = value * 8 + u32::from(next - b'0');
                        input.next();
                    }
                }
                bytes.push(u8::try_from(value).unwrap_or(b'?'));
            }
            Some(other) => bytes.push(other),
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Quote `path` the way git does when it contains special characters
pub(crate) fn quote(path: &str) -> String {
    let needs_quotes = path
        .chars()
        .any(|c| c == '"' || c == '\\' || c.is_ascii_control());
    if !needs_quotes {
        return path.to_string();
    }
    let mut quoted = String::with_capacity(path.len() + 2);
    quoted.push('"');
    for c in path.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            c if c.is_ascii_control() => quoted.push_str(&format!("\\{:03o}", c as u32)),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

impl fmt::Display for FileDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.header {
            writeln!(f, "{line}")?;
        }
        for hunk in &self.hunks {
            write!(f, "{hunk}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn parse_single_hunk() {
        let diff = r#"diff --git a/flake.nix b/flake.nix
index abc1234..def5678 100644
--- a/flake.nix
+++ b/flake.nix
@@ -136,0 +137 @@
+      debug = true;
"#;
        let file_diff = FileDiff::parse(diff).unwrap();
        assert_eq!(file_diff.path, "flake.nix");
        assert_eq!(file_diff.kind, ChangeKind::Modified);
        assert_eq!(file_diff.header.len(), 4);
        assert_eq!(file_diff.hunks.len(), 1);
        assert_eq!(file_diff.hunks[0].old.start, 136);
        assert_eq!(file_diff.hunks[0].new.start, 137);
        assert_eq!(file_diff.hunks[0].lines[0].content, "      debug = true;");
    }

    #[test]
    fn parse_multiple_hunks_roundtrips() {
        let diff = r#"diff --git a/config.nix b/config.nix
index fa2da6e..41114ff 100644
--- a/config.nix
+++ b/config.nix
@@ -1,4 +1,5 @@ { pkgs }:
 line 1
 line 2
+# FIRST INSERTION
 line 3
 line 4
@@ -7,3 +8,3 @@ line 6
 line 7
-line 8
+line eight
 line 9
"#;
        let file_diff = FileDiff::parse(diff).unwrap();
        assert_eq!(file_diff.hunks.len(), 2);
        assert_eq!(file_diff.hunks[1].heading, " line 6");
        assert_eq!(file_diff.to_string(), diff);
    }

    #[test]
    fn parse_new_file() {
        let diff = "diff --git a/new.txt b/new.txt
new file mode 100644
index 0000000..ce01362
--- /dev/null
+++ b/new.txt
@@ -0,0 +1 @@
+hello
";
        let file_diff = FileDiff::parse(diff).unwrap();
        assert_eq!(file_diff.path, "new.txt");
        assert_eq!(file_diff.kind, ChangeKind::Added);
    }

    #[test]
    fn parse_deleted_file() {
        let diff = "diff --git a/old.txt b/old.txt
deleted file mode 100644
index ce01362..0000000
--- a/old.txt
+++ /dev/null
@@ -1 +0,0 @@
-hello
";
        let file_diff = FileDiff::parse(diff).unwrap();
        assert_eq!(file_diff.path, "old.txt");
        assert_eq!(file_diff.kind, ChangeKind::Deleted);
    }

    #[test]
    fn parse_pure_rename_without_hunks() {
        let diff = "diff --git a/before.rs b/after.rs
similarity index 100%
rename from before.rs
rename to after.rs
";
        let file_diff = FileDiff::parse(diff).unwrap();
        assert_eq!(file_diff.path, "after.rs");
        assert_eq!(file_diff.old_path.as_deref(), Some("before.rs"));
        assert_eq!(file_diff.kind, ChangeKind::Renamed);
        assert!(file_diff.hunks.is_empty());
        assert_eq!(file_diff.to_string(), diff);
    }

    #[test]
    fn parse_binary_file() {
        let diff = "diff --git a/logo.png b/logo.png
index 1111111..2222222 100644
Binary files a/logo.png and b/logo.png differ
";
        let file_diff = FileDiff::parse(diff).unwrap();
        assert_eq!(file_diff.path, "logo.png");
        assert!(file_diff.binary);
        assert!(file_diff.hunks.is_empty());
    }

    #[test]
    fn parse_quoted_paths() {
        let diff = "diff --git \"a/caf\\303\\251 \\\"x\\\".txt\" \"b/caf\\303\\251 \\\"x\\\".txt\"
index 1111111..2222222 100644
--- \"a/caf\\303\\251 \\\"x\\\".txt\"
+++ \"b/caf\\303\\251 \\\"x\\\".txt\"
@@ -1 +1 @@
-a
+b
";
        let file_diff = FileDiff::parse(diff).unwrap();
        assert_eq!(file_diff.path, "café \"x\".txt");
        assert_eq!(file_diff.to_string(), diff);
    }

    #[test]
    fn parse_path_with_spaces_and_b_slash() {
        let diff = "diff --git a/dir b/x.txt b/dir b/x.txt
deleted file mode 100644
index ce01362..0000000
Binary files a/dir b/x.txt and /dev/null differ
";
        let file_diff = FileDiff::parse(diff).unwrap();
        assert_eq!(file_diff.path, "dir b/x.txt");
        assert_eq!(file_diff.kind, ChangeKind::Deleted);
    }

    #[test]
    fn parse_plain_unified_diff() {
        let diff = "--- notes.txt\t2024-01-01 10:00:00
+++ notes.txt\t2024-01-02 10:00:00
@@ -1 +1 @@
-draft
+final
";
        let file_diff = FileDiff::parse(diff).unwrap();
        assert_eq!(file_diff.path, "notes.txt");
        assert_eq!(file_diff.hunks.len(), 1);
    }

    #[test]
    fn parse_rejects_leading_garbage() {
        assert!(matches!(
            FileDiff::parse("hello\n"),
            Err(DiffError::UnexpectedLine { line: 1, .. })
        ));
    }

    #[test]
    fn selection_flags() {
        let mut file_diff = FileDiff::parse(
            "diff --git a/f b/f
--- a/f
+++ b/f
@@ -1 +1 @@
-a
+A
@@ -10 +10 @@
-b
+B
",
        )
        .unwrap();
        assert!(file_diff.toggle(1).unwrap());
        assert_eq!(file_diff.selected_indices(), vec![1]);
        file_diff.select_all();
        assert_eq!(file_diff.selected_indices(), vec![0, 1]);
        file_diff.clear_selection();
        assert!(file_diff.selected_indices().is_empty());

        let err = file_diff.select(2, true).unwrap_err();
        assert!(matches!(
            err,
            PatchError::HunkOutOfRange {
                index: 3,
                count: 2,
                ..
            }
        ));
    }

    #[test]
    fn same_changes_ignores_selection() {
        let text = "diff --git a/f b/f
--- a/f
+++ b/f
@@ -1 +1 @@
-a
+A
";
        let mut first = FileDiff::parse(text).unwrap();
        let second = FileDiff::parse(text).unwrap();
        first.select_all();
        assert!(first.same_changes(&second));

        let edited = FileDiff::parse(&text.replace("+A", "+AA")).unwrap();
        assert!(!first.same_changes(&edited));
    }

    #[test]
    fn quote_roundtrips_through_unquote() {
        assert_eq!(quote("plain name.txt"), "plain name.txt");
        let quoted = quote("tab\there \"q\"");
        assert_eq!(quoted, "\"tab\\there \\\"q\\\"\"");
        assert_eq!(unquote(&quoted), "tab\there \"q\"");
    }
}
