//! Conventional commit messages.
//!
//! A [`CommitDraft`] holds the parts of a message as the composer edits
//! them and renders `type(scope)!: subject`, body and footer separated by
//! blank lines. Merge commits keep git's prepared message instead.

use error_set::error_set;
use nom::{
    IResult, Parser,
    bytes::complete::take_until,
    character::complete::{alphanumeric1, char, space0},
    combinator::opt,
    sequence::delimited,
};
use std::fmt;
use std::str::FromStr;

error_set! {
    /// Reasons a draft cannot become a commit message
    DraftError := {
        #[display("A commit type is required")]
        MissingType,
        #[display("A subject is required")]
        MissingSubject,
        #[display("Unknown commit type '{value}'")]
        UnknownType { value: String },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitType {
    Feat,
    Fix,
    Docs,
    Style,
    Refactor,
    Test,
    Chore,
    Merge,
}

impl CommitType {
    pub const ALL: [CommitType; 8] = [
        CommitType::Feat,
        CommitType::Fix,
        CommitType::Docs,
        CommitType::Style,
        CommitType::Refactor,
        CommitType::Test,
        CommitType::Chore,
        CommitType::Merge,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommitType::Feat => "feat",
            CommitType::Fix => "fix",
            CommitType::Docs => "docs",
            CommitType::Style => "style",
            CommitType::Refactor => "refactor",
            CommitType::Test => "test",
            CommitType::Chore => "chore",
            CommitType::Merge => "merge",
        }
    }
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommitType {
    type Err = DraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        CommitType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DraftError::UnknownType {
                value: s.to_string(),
            })
    }
}

/// Parts of a commit message being composed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitDraft {
    pub kind: Option<CommitType>,
    pub scope: String,
    pub subject: String,
    pub body: String,
    pub footer: String,
    pub breaking: bool,
    /// Concluding a merge: the message is subject, body and footer only
    pub merge: bool,
}

/// `type(scope)!:` prefix of a conventional header
fn header_prefix(input: &str) -> IResult<&str, (&str, Option<&str>, bool)> {
    (
        alphanumeric1,
        opt(delimited(char('('), take_until(")"), char(')'))),
        opt(char('!')),
        char(':'),
        space0,
    )
        .map(|(kind, scope, bang, _, _)| (kind, scope, bang.is_some()))
        .parse(input)
}

impl CommitDraft {
    /// Render the final commit message.
    pub fn message(&self) -> Result<String, DraftError> {
        let subject = self.subject.trim();
        if subject.is_empty() {
            return Err(DraftError::MissingSubject);
        }

        let mut message = if self.merge {
            subject.to_string()
        } else {
            let kind = self.kind.ok_or(DraftError::MissingType)?;
            let scope = self.scope.trim();
            let scope = if scope.is_empty() {
                String::new()
            } else {
                format!("({scope})")
            };
            let bang = if self.breaking { "!" } else { "" };
            format!("{kind}{scope}{bang}: {subject}")
        };

        for section in [&self.body, &self.footer] {
            let section = section.trim();
            if !section.is_empty() {
                message.push_str("\n\n");
                message.push_str(section);
            }
        }
        Ok(message)
    }

    /// Fill a draft from a suggested message (`type(scope): subject`,
    /// a blank line, then the body). Text that does not follow the
    /// convention becomes the subject and body as-is.
    pub fn from_suggestion(text: &str) -> Self {
        let text = strip_code_fence(text.trim());
        let (header, rest) = match text.split_once("\n\n") {
            Some((header, rest)) => (header.trim(), rest.trim()),
            None => (text.trim(), ""),
        };
        let header = header.lines().next().unwrap_or_default();

        let mut draft = CommitDraft::default();
        match header_prefix(header) {
            Ok((subject, (kind, scope, breaking))) => {
                draft.kind = kind.parse().ok();
                draft.scope = scope.unwrap_or_default().trim().to_string();
                draft.breaking = breaking;
                draft.subject = subject.trim().to_string();
            }
            Err(_) => draft.subject = header.trim().to_string(),
        }

        let (body, footer) = split_footer(rest);
        draft.body = body.to_string();
        draft.footer = footer.to_string();
        draft.breaking |= footer.starts_with("BREAKING CHANGE");
        draft
    }

    /// Draft for concluding a merge from git's prepared `MERGE_MSG`.
    /// Comment lines are dropped.
    pub fn from_merge_message(text: &str) -> Self {
        let kept: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        let kept = kept.join("\n");
        let kept = kept.trim();
        let (subject, body) = kept.split_once('\n').unwrap_or((kept, ""));
        CommitDraft {
            kind: Some(CommitType::Merge),
            subject: subject.trim().to_string(),
            body: body.trim().to_string(),
            merge: true,
            ..CommitDraft::default()
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an info string such as ```text
    let inner = inner.split_once('\n').map_or("", |(_, rest)| rest);
    inner.trim_end().strip_suffix("```").unwrap_or(inner).trim()
}

/// Split a trailing footer paragraph (`Token: value`, `Token #value`,
/// `BREAKING CHANGE: ...`) from the body.
fn split_footer(rest: &str) -> (&str, &str) {
    let (body, last) = match rest.rsplit_once("\n\n") {
        Some((body, last)) => (body.trim_end(), last.trim()),
        None => ("", rest.trim()),
    };
    if !last.is_empty() && last.lines().all(is_footer_line) {
        (body, last)
    } else {
        (rest, "")
    }
}

fn is_footer_line(line: &str) -> bool {
    if line.starts_with("BREAKING CHANGE: ") || line.starts_with("BREAKING-CHANGE: ") {
        return true;
    }
    let token_end = line.find([':', ' ']).unwrap_or(line.len());
    let (token, rest) = line.split_at(token_end);
    !token.is_empty()
        && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && (rest.starts_with(": ") || rest.starts_with(" #"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn message_with_scope_body_and_footer() {
        let draft = CommitDraft {
            kind: Some(CommitType::Feat),
            scope: "parser".into(),
            subject: "support quoted paths".into(),
            body: "Git quotes paths with special characters.".into(),
            footer: "Closes #12".into(),
            ..CommitDraft::default()
        };
        insta::assert_snapshot!(draft.message().unwrap(), @r"
        feat(parser): support quoted paths

        Git quotes paths with special characters.

        Closes #12
        ");
    }

    #[test]
    fn message_without_scope_marks_breaking() {
        let draft = CommitDraft {
            kind: Some(CommitType::Refactor),
            subject: "drop legacy config".into(),
            breaking: true,
            ..CommitDraft::default()
        };
        assert_eq!(draft.message().unwrap(), "refactor!: drop legacy config");
    }

    #[test]
    fn message_requires_type_and_subject() {
        let missing_type = CommitDraft {
            subject: "x".into(),
            ..CommitDraft::default()
        };
        assert!(matches!(missing_type.message(), Err(DraftError::MissingType)));

        let missing_subject = CommitDraft {
            kind: Some(CommitType::Fix),
            subject: "   ".into(),
            ..CommitDraft::default()
        };
        assert!(matches!(missing_subject.message(), Err(DraftError::MissingSubject)));
    }

    #[test]
    fn merge_message_skips_the_prefix() {
        let draft = CommitDraft::from_merge_message(
            "Merge branch 'feature'\n\n# Conflicts:\n#\tboth.txt\n",
        );
        assert!(draft.merge);
        assert_eq!(draft.kind, Some(CommitType::Merge));
        assert_eq!(draft.message().unwrap(), "Merge branch 'feature'");
    }

    #[test]
    fn suggestion_with_scope_and_body() {
        let draft = CommitDraft::from_suggestion(
            "fix(status): handle detached HEAD\n\nThe branch header reads (detached).\n\nRefs: #40",
        );
        assert_eq!(draft.kind, Some(CommitType::Fix));
        assert_eq!(draft.scope, "status");
        assert_eq!(draft.subject, "handle detached HEAD");
        assert_eq!(draft.body, "The branch header reads (detached).");
        assert_eq!(draft.footer, "Refs: #40");
    }

    #[test]
    fn suggestion_in_code_fence() {
        let draft = CommitDraft::from_suggestion("```text\ndocs: explain selectors\n```");
        assert_eq!(draft.kind, Some(CommitType::Docs));
        assert_eq!(draft.subject, "explain selectors");
        assert!(draft.body.is_empty());
    }

    #[test]
    fn suggestion_with_unknown_type_keeps_subject() {
        let draft = CommitDraft::from_suggestion("perf!: faster parsing");
        assert_eq!(draft.kind, None);
        assert!(draft.breaking);
        assert_eq!(draft.subject, "faster parsing");
    }

    #[test]
    fn free_form_suggestion_becomes_subject() {
        let draft = CommitDraft::from_suggestion("Update the readme\n\nMore words here.");
        assert_eq!(draft.kind, None);
        assert_eq!(draft.subject, "Update the readme");
        assert_eq!(draft.body, "More words here.");
        assert!(draft.footer.is_empty());
    }

    #[test]
    fn commit_type_parses_case_insensitively() {
        assert_eq!("Feat".parse::<CommitType>().unwrap(), CommitType::Feat);
        assert!("wip".parse::<CommitType>().is_err());
    }
}
