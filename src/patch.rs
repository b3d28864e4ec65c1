//! Synthesizing partial patches for `git apply --cached`.
//!
//! A patch is built against the side it will be applied to. Staging moves
//! changes from the worktree diff forward onto the index; unstaging applies
//! the staged diff in reverse. Either way one side of every hunk matches
//! the index exactly (the *fixed* side) and the other side is rewritten to
//! account for the hunks left out.
//!
//! ```text
//! selected hunks     fixed side        varying side
//!   #1 -2,3 +2,4     position 2        2 + 0         delta +1
//!   #3 -40 +41,2     position 40       40 + 1        delta +2
//! ```

use crate::diff::file::quote;
use crate::diff::{ChangeKind, FileDiff, Hunk, HunkRange};
use crate::parse::LineRef;
use error_set::error_set;
use std::fmt;

error_set! {
    /// Errors while building a patch from a selection
    PatchError := {
        #[display("{path} is a binary file and can only be staged as a whole")]
        BinaryFile { path: String },
        #[display("{path} has {count} hunks; there is no hunk {index}")]
        HunkOutOfRange { path: String, index: usize, count: usize },
        #[display("No changed lines of {path} match the selection")]
        NoMatchingLines { path: String },
    }
}

/// Which way a patch moves changes relative to the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Worktree changes onto the index (staging)
    Forward,
    /// Staged changes back out of the index (unstaging)
    Reverse,
}

/// A single-file patch ready for `git apply`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub path: String,
    pub direction: Direction,
    pub header: Vec<String>,
    pub hunks: Vec<Hunk>,
}

impl Patch {
    /// Whether any hunk has no surrounding context lines
    pub fn has_zero_context(&self) -> bool {
        use crate::diff::LineKind;
        self.hunks
            .iter()
            .any(|h| !h.lines.iter().any(|l| l.kind == LineKind::Context))
    }
}

impl fmt::Display for Patch {
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

/// Build a patch from the selected hunks of `file`.
///
/// Returns `Ok(None)` when no hunk is selected.
pub fn build_patch(file: &FileDiff, direction: Direction) -> Result<Option<Patch>, PatchError> {
    let hunks: Vec<Hunk> = file.hunks.iter().filter(|h| h.selected).cloned().collect();
    if hunks.is_empty() {
        return Ok(None);
    }
    Ok(Some(assemble(file, direction, hunks)))
}

/// Build a patch containing only the changed lines matched by `refs`.
///
/// Unselected changes are folded into context as described on
/// [`Hunk::retain`]; context is then trimmed to `context` lines around
/// what remains.
pub fn build_line_patch(
    file: &FileDiff,
    direction: Direction,
    refs: &[LineRef],
    context: usize,
) -> Result<Patch, PatchError> {
    if file.binary {
        return Err(PatchError::BinaryFile {
            path: file.path.clone(),
        });
    }

    let hunks: Vec<Hunk> = file
        .hunks
        .iter()
        .filter_map(|hunk| {
            let mut kept = hunk.retain(
                direction,
                |old| refs.iter().any(|r| r.matches_old(old)),
                |new| refs.iter().any(|r| r.matches_new(new)),
            )?;
            kept.trim_context(context);
            Some(kept)
        })
        .collect();

    if hunks.is_empty() {
        return Err(PatchError::NoMatchingLines {
            path: file.path.clone(),
        });
    }
    Ok(assemble(file, direction, hunks))
}

fn assemble(file: &FileDiff, direction: Direction, mut hunks: Vec<Hunk>) -> Patch {
    let complete = hunks.len() == file.hunks.len()
        && hunks
            .iter()
            .zip(&file.hunks)
            .all(|(kept, original)| kept.lines == original.lines);

    // Offsets come only from hunks that are part of this patch
    let mut delta: i64 = 0;
    for hunk in &mut hunks {
        let (fixed, varying) = match direction {
            Direction::Forward => (hunk.old, &mut hunk.new),
            Direction::Reverse => (hunk.new, &mut hunk.old),
        };
        let position = (i64::from(fixed.position()) + delta).max(1);
        *varying = HunkRange::at(u32::try_from(position).unwrap_or(u32::MAX), varying.count);
        delta += i64::from(varying.count) - i64::from(fixed.count);
    }

    // A partial selection of an added, deleted or renamed file is an edit of
    // the file as the index already knows it
    let header = if complete || file.kind == ChangeKind::Modified {
        file.header.clone()
    } else {
        modification_header(&file.path)
    };

    Patch {
        path: file.path.clone(),
        direction,
        header,
        hunks,
    }
}

fn modification_header(path: &str) -> Vec<String> {
    let a = quote(&format!("a/{path}"));
    let b = quote(&format!("b/{path}"));
    vec![
        format!("diff --git {a} {b}"),
        format!("--- {a}"),
        format!("+++ {b}"),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::diff::Diff;
    use crate::parse::{Selector, parse_target};
    use similar_asserts::assert_eq;

    const FOUR_HUNKS: &str = "diff --git a/f.txt b/f.txt
index 1111111..2222222 100644
--- a/f.txt
+++ b/f.txt
@@ -1,4 +1,5 @@
 a
+inserted after a
 b
 c
 d
@@ -10,3 +11,3 @@
 j
-k
+K
 l
@@ -20,4 +21,3 @@
 t
-u
 v
 w
@@ -30,2 +30,4 @@
 3
+new 1
+new 2
 4
";

    fn file() -> FileDiff {
        Diff::parse(FOUR_HUNKS).unwrap().files.remove(0)
    }

    fn refs(spec: &str) -> Vec<LineRef> {
        match parse_target(&format!("f.txt:{spec}")).unwrap().selector {
            Selector::Lines(refs) => refs,
            _ => Vec::new(),
        }
    }

    #[test]
    fn nothing_selected_builds_nothing() {
        assert_eq!(build_patch(&file(), Direction::Forward).unwrap(), None);
    }

    #[test]
    fn all_hunks_reproduce_the_diff() {
        let mut file = file();
        file.select_all();
        let patch = build_patch(&file, Direction::Forward).unwrap().unwrap();
        assert_eq!(patch.to_string(), FOUR_HUNKS);
    }

    #[test]
    fn forward_patch_recomputes_new_starts() {
        let mut file = file();
        file.select(1, true).unwrap();
        file.select(3, true).unwrap();
        let patch = build_patch(&file, Direction::Forward).unwrap().unwrap();
        insta::assert_snapshot!(patch.to_string(), @r"
        diff --git a/f.txt b/f.txt
        index 1111111..2222222 100644
        --- a/f.txt
        +++ b/f.txt
        @@ -10,3 +10,3 @@
         j
        -k
        +K
         l
        @@ -30,2 +30,4 @@
         3
        +new 1
        +new 2
         4
        ");
    }

    #[test]
    fn forward_patch_skipping_a_deletion_hunk() {
        let mut file = file();
        file.select(0, true).unwrap();
        file.select(3, true).unwrap();
        let patch = build_patch(&file, Direction::Forward).unwrap().unwrap();
        let headers: Vec<String> = patch
            .hunks
            .iter()
            .map(|h| format!("-{} +{}", h.old, h.new))
            .collect();
        assert_eq!(headers, vec!["-1,4 +1,5", "-30,2 +31,4"]);
    }

    #[test]
    fn reverse_patch_recomputes_old_starts() {
        let mut file = file();
        file.select(3, true).unwrap();
        let patch = build_patch(&file, Direction::Reverse).unwrap().unwrap();
        assert_eq!(patch.direction, Direction::Reverse);
        // The staged side keeps its numbers; the old side assumes nothing
        // before it was unstaged.
        assert_eq!(patch.hunks[0].new, HunkRange::new(30, 4));
        assert_eq!(patch.hunks[0].old, HunkRange::new(30, 2));

        let mut file = self::file();
        file.select(0, true).unwrap();
        file.select(2, true).unwrap();
        let patch = build_patch(&file, Direction::Reverse).unwrap().unwrap();
        assert_eq!(patch.hunks[1].new, HunkRange::new(21, 3));
        assert_eq!(patch.hunks[1].old, HunkRange::new(20, 4));
    }

    #[test]
    fn line_patch_keeps_one_addition() {
        let patch =
            build_line_patch(&file(), Direction::Forward, &refs("32"), 3).unwrap();
        assert_eq!(
            patch.to_string(),
            "diff --git a/f.txt b/f.txt
index 1111111..2222222 100644
--- a/f.txt
+++ b/f.txt
@@ -30,2 +30,3 @@
 3
+new 2
 4
"
        );
    }

    #[test]
    fn line_patch_with_zero_context() {
        let patch = build_line_patch(&file(), Direction::Forward, &refs("-21"), 0).unwrap();
        assert!(patch.has_zero_context());
        assert_eq!(patch.hunks[0].to_string(), "@@ -21 +20,0 @@\n-u\n");
    }

    #[test]
    fn line_patch_without_matches() {
        let result = build_line_patch(&file(), Direction::Forward, &refs("500"), 3);
        assert!(matches!(result, Err(PatchError::NoMatchingLines { .. })));
    }

    #[test]
    fn line_patch_rejects_binary_files() {
        let file = FileDiff::parse(
            "diff --git a/a.png b/a.png\nindex 1..2 100644\nBinary files a/a.png and b/a.png differ\n",
        )
        .unwrap();
        let result = build_line_patch(&file, Direction::Forward, &refs("1"), 3);
        assert!(matches!(result, Err(PatchError::BinaryFile { .. })));
    }

    #[test]
    fn partial_selection_of_new_file_edits_it() {
        let file = FileDiff::parse(
            "diff --git a/new.txt b/new.txt
new file mode 100644
index 0000000..2222222
--- /dev/null
+++ b/new.txt
@@ -0,0 +1,2 @@
+one
+two
",
        )
        .unwrap();
        let patch = build_line_patch(&file, Direction::Reverse, &refs("2"), 3).unwrap();
        assert_eq!(
            patch.to_string(),
            "diff --git a/new.txt b/new.txt
--- a/new.txt
+++ b/new.txt
@@ -1 +1,2 @@
 one
+two
"
        );
    }

    #[test]
    fn quoted_header_for_special_paths() {
        assert_eq!(
            modification_header("tab\tname"),
            vec![
                "diff --git \"a/tab\\tname\" \"b/tab\\tname\"".to_string(),
                "--- \"a/tab\\tname\"".to_string(),
                "+++ \"b/tab\\tname\"".to_string(),
            ]
        );
    }
}
