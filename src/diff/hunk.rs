use super::{Cursor, DiffError};
use crate::patch::Direction;
use nom::{
    IResult, Parser,
    bytes::complete::tag,
    character::complete::{char, u32 as number},
    combinator::opt,
    sequence::preceded,
};
use std::fmt;

pub(crate) const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Role of a line inside a hunk body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Context,
    Addition,
    Deletion,
}

impl LineKind {
    pub fn marker(self) -> char {
        match self {
            LineKind::Context => ' ',
            LineKind::Addition => '+',
            LineKind::Deletion => '-',
        }
    }
}

/// One line of a hunk body, without its leading marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    pub content: String,
    /// Followed by `\ No newline at end of file`
    pub missing_final_newline: bool,
}

impl DiffLine {
    pub fn new(kind: LineKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            missing_final_newline: false,
        }
    }

    fn with_kind(&self, kind: LineKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    fn on_old_side(&self) -> bool {
        self.kind != LineKind::Addition
    }

    fn on_new_side(&self) -> bool {
        self.kind != LineKind::Deletion
    }
}

/// `start,count` half of a hunk header
///
/// Git writes an empty range as the line *before* the gap, so a count of
/// zero shifts the start down by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkRange {
    pub start: u32,
    pub count: u32,
}

impl HunkRange {
    pub fn new(start: u32, count: u32) -> Self {
        Self { start, count }
    }

    /// Range of `count` lines whose first line (or gap) sits at `position`
    pub fn at(position: u32, count: u32) -> Self {
        let start = if count == 0 {
            position.saturating_sub(1)
        } else {
            position
        };
        Self { start, count }
    }

    /// Line number of the first line, or of the line after the gap
    pub fn position(&self) -> u32 {
        if self.count == 0 {
            self.start + 1
        } else {
            self.start
        }
    }
}

impl fmt::Display for HunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.count {
            1 => write!(f, "{}", self.start),
            n => write!(f, "{},{}", self.start, n),
        }
    }
}

/// A single hunk from a git diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old: HunkRange,
    pub new: HunkRange,
    /// Text after the closing `@@`, including its leading space
    pub heading: String,
    pub lines: Vec<DiffLine>,
    /// Selection flag; not part of the diff text
    pub selected: bool,
}

fn range(input: &str) -> IResult<&str, HunkRange> {
    (number, opt(preceded(char(','), number)))
        .map(|(start, count)| HunkRange::new(start, count.unwrap_or(1)))
        .parse(input)
}

fn header(input: &str) -> IResult<&str, (HunkRange, HunkRange)> {
    (
        preceded(tag("@@ -"), range),
        preceded(tag(" +"), range),
        tag(" @@"),
    )
        .map(|(old, new, _)| (old, new))
        .parse(input)
}

impl Hunk {
    /// Parse a hunk from diff text (header + body lines)
    pub fn parse(text: &str) -> Result<Self, DiffError> {
        let mut cursor = Cursor::new(text);
        let line = cursor.line_no();
        let header = cursor.next().unwrap_or_default();
        Self::parse_body(line, header, &mut cursor)
    }

    /// Parse the body following `header`, consuming exactly as many lines as
    /// the header's counts announce plus any trailing no-newline markers.
    pub(crate) fn parse_body(
        header_line: usize,
        header_text: &str,
        cursor: &mut Cursor<'_>,
    ) -> Result<Self, DiffError> {
        let malformed = || DiffError::MalformedHunkHeader {
            line: header_line,
            header: header_text.to_string(),
        };
        let (heading, (old, new)) = header(header_text).map_err(|_| malformed())?;

        let mut old_left = old.count;
        let mut new_left = new.count;
        let mut lines: Vec<DiffLine> = Vec::new();

        while old_left > 0 || new_left > 0 {
            let line_no = cursor.line_no();
            let Some(text) = cursor.next() else {
                return Err(DiffError::TruncatedHunk { line: header_line });
            };
            if text.starts_with('\\') {
                mark_missing_newline(&mut lines, line_no, text)?;
                continue;
            }
            let unexpected = || DiffError::UnexpectedHunkLine {
                line: line_no,
                text: text.to_string(),
            };
            // A blank line is an empty context line whose space was stripped
            let (kind, content) = match text.as_bytes().first() {
                None => (LineKind::Context, ""),
                Some(b' ') => (LineKind::Context, &text[1..]),
                Some(b'-') => (LineKind::Deletion, &text[1..]),
                Some(b'+') => (LineKind::Addition, &text[1..]),
                Some(_) => return Err(unexpected()),
            };
            match kind {
                LineKind::Context if old_left > 0 && new_left > 0 => {
                    old_left -= 1;
                    new_left -= 1;
                }
                LineKind::Deletion if old_left > 0 => old_left -= 1,
                LineKind::Addition if new_left > 0 => new_left -= 1,
                _ => return Err(unexpected()),
            }
            lines.push(DiffLine::new(kind, content));
        }

        while let Some(text) = cursor.peek()
            && text.starts_with('\\')
        {
            let line_no = cursor.line_no();
            cursor.next();
            mark_missing_newline(&mut lines, line_no, text)?;
        }

        Ok(Hunk {
            old,
            new,
            heading: heading.to_string(),
            lines,
            selected: false,
        })
    }

    pub fn additions(&self) -> usize {
        self.count(LineKind::Addition)
    }

    pub fn deletions(&self) -> usize {
        self.count(LineKind::Deletion)
    }

    fn count(&self, kind: LineKind) -> usize {
        self.lines.iter().filter(|l| l.kind == kind).count()
    }

    /// Body lines with their old and new line numbers
    pub fn numbered_lines(&self) -> impl Iterator<Item = (Option<u32>, Option<u32>, &DiffLine)> {
        let mut old = self.old.position();
        let mut new = self.new.position();
        self.lines.iter().map(move |line| match line.kind {
            LineKind::Context => {
                let numbers = (Some(old), Some(new));
                old += 1;
                new += 1;
                (numbers.0, numbers.1, line)
            }
            LineKind::Deletion => {
                old += 1;
                (Some(old - 1), None, line)
            }
            LineKind::Addition => {
                new += 1;
                (None, Some(new - 1), line)
            }
        })
    }

    /// Keep only the changed lines accepted by `keep_old` / `keep_new`.
    ///
    /// Unselected changes are rewritten so the hunk still applies to the
    /// side the patch starts from: going forward (toward the worktree) a
    /// dropped deletion becomes context and a dropped addition disappears;
    /// in reverse the roles swap. The varying side's start is left for the
    /// patch builder to recompute. Returns `None` if no change survives.
    pub fn retain<F, G>(&self, direction: Direction, mut keep_old: F, mut keep_new: G) -> Option<Self>
    where
        F: FnMut(u32) -> bool,
        G: FnMut(u32) -> bool,
    {
        let mut lines = Vec::with_capacity(self.lines.len());
        let mut changed = false;

        for (old_no, new_no, line) in self.numbered_lines() {
            match line.kind {
                LineKind::Context => lines.push(line.clone()),
                LineKind::Deletion => {
                    if old_no.is_some_and(&mut keep_old) {
                        changed = true;
                        lines.push(line.clone());
                    } else if direction == Direction::Forward {
                        lines.push(line.with_kind(LineKind::Context));
                    }
                }
                LineKind::Addition => {
                    if new_no.is_some_and(&mut keep_new) {
                        changed = true;
                        lines.push(line.clone());
                    } else if direction == Direction::Reverse {
                        lines.push(line.with_kind(LineKind::Context));
                    }
                }
            }
        }

        if !changed {
            return None;
        }

        let mut hunk = Hunk {
            old: self.old,
            new: self.new,
            heading: self.heading.clone(),
            lines,
            selected: true,
        };
        hunk.repair_missing_newlines();
        hunk.recount(hunk.old.position(), hunk.new.position());
        Some(hunk)
    }

    /// Drop leading and trailing context beyond `context` lines.
    pub fn trim_context(&mut self, context: usize) {
        let is_context = |l: &&DiffLine| l.kind == LineKind::Context;
        let leading = self.lines.iter().take_while(is_context).count();
        if leading == self.lines.len() {
            return;
        }
        let trailing = self.lines.iter().rev().take_while(is_context).count();
        let cut_front = leading.saturating_sub(context);
        let cut_back = trailing.saturating_sub(context);
        if cut_front == 0 && cut_back == 0 {
            return;
        }

        let shift = u32::try_from(cut_front).unwrap_or(u32::MAX);
        let old_position = self.old.position().saturating_add(shift);
        let new_position = self.new.position().saturating_add(shift);
        self.lines.truncate(self.lines.len() - cut_back);
        self.lines.drain(..cut_front);
        self.recount(old_position, new_position);
    }

    /// Keep `\ No newline at end of file` markers valid after lines were
    /// converted to context.
    ///
    /// A context line without a newline must end both files. If changes on
    /// one side follow it, that side needs the line *with* a newline, so the
    /// context line is split into a deletion and an addition.
    fn repair_missing_newlines(&mut self) {
        let bridge = self
            .lines
            .iter()
            .position(|l| l.kind == LineKind::Context && l.missing_final_newline);
        if let Some(i) = bridge
            && i + 1 < self.lines.len()
        {
            let rest = &self.lines[i + 1..];
            let old_continues = rest.iter().any(DiffLine::on_old_side);
            let new_continues = rest.iter().any(DiffLine::on_new_side);
            let content = self.lines[i].content.clone();
            match (old_continues, new_continues) {
                (false, true) => {
                    self.lines[i].kind = LineKind::Deletion;
                    self.lines
                        .insert(i + 1, DiffLine::new(LineKind::Addition, content));
                }
                (true, false) => {
                    self.lines[i] = DiffLine::new(LineKind::Deletion, content.clone());
                    self.lines.push(DiffLine {
                        missing_final_newline: true,
                        ..DiffLine::new(LineKind::Addition, content)
                    });
                }
                _ => {}
            }
        }

        // A marker is only meaningful on the last line of its side
        let last_old = self.lines.iter().rposition(DiffLine::on_old_side);
        let last_new = self.lines.iter().rposition(DiffLine::on_new_side);
        for (i, line) in self.lines.iter_mut().enumerate() {
            let ends = match line.kind {
                LineKind::Context => last_old == Some(i) && last_new == Some(i),
                LineKind::Deletion => last_old == Some(i),
                LineKind::Addition => last_new == Some(i),
            };
            if !ends {
                line.missing_final_newline = false;
            }
        }
    }

    fn recount(&mut self, old_position: u32, new_position: u32) {
        let old_count = self.lines.iter().filter(|l| l.on_old_side()).count();
        let new_count = self.lines.iter().filter(|l| l.on_new_side()).count();
        self.old = HunkRange::at(old_position, u32::try_from(old_count).unwrap_or(u32::MAX));
        self.new = HunkRange::at(new_position, u32::try_from(new_count).unwrap_or(u32::MAX));
    }
}

fn mark_missing_newline(lines: &mut [DiffLine], line: usize, text: &str) -> Result<(), DiffError> {
    match lines.last_mut() {
        Some(last) => {
            last.missing_final_newline = true;
            Ok(())
        }
        None => Err(DiffError::UnexpectedHunkLine {
            line,
            text: text.to_string(),
        }),
    }
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "@@ -{} +{} @@{}", self.old, self.new, self.heading)?;
        for line in &self.lines {
            writeln!(f, "{}{}", line.kind.marker(), line.content)?;
            if line.missing_final_newline {
                writeln!(f, "{NO_NEWLINE_MARKER}")?;
            }
        }
        Ok(())
    }
}
