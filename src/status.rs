//! Repository status from `git status --porcelain=v2 --branch -z`.
//!
//! Records are NUL-terminated. Rename records (`2`) are followed by an
//! extra record holding the original path.

use error_set::error_set;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

error_set! {
    /// Errors from reading porcelain status output
    StatusError := {
        #[display("Malformed status record {record:?}")]
        MalformedEntry { record: String },
    }
}

/// How the current branch relates to its upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracking {
    NoUpstream,
    UpToDate { upstream: String },
    Ahead { upstream: String, commits: u32 },
    Behind { upstream: String, commits: u32 },
    Diverged { upstream: String, ahead: u32, behind: u32 },
}

impl fmt::Display for Tracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tracking::NoUpstream => write!(f, "no upstream"),
            Tracking::UpToDate { upstream } => write!(f, "up to date with {upstream}"),
            Tracking::Ahead { upstream, commits } => {
                write!(f, "{commits} commit(s) ahead of {upstream}")
            }
            Tracking::Behind { upstream, commits } => {
                write!(f, "{commits} commit(s) behind {upstream}")
            }
            Tracking::Diverged {
                upstream,
                ahead,
                behind,
            } => write!(f, "diverged from {upstream} ({ahead} ahead, {behind} behind)"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryStatus {
    /// Current branch; `None` when HEAD is detached
    pub branch: Option<String>,
    /// Commit at HEAD; `None` on an unborn branch
    pub head: Option<String>,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub staged: BTreeSet<String>,
    pub unstaged: BTreeSet<String>,
    pub untracked: BTreeSet<String>,
    pub conflicted: BTreeSet<String>,
    /// New path -> original path for renames and copies
    pub renamed_from: BTreeMap<String, String>,
}

impl RepositoryStatus {
    pub fn parse(text: &str) -> Result<Self, StatusError> {
        let mut status = RepositoryStatus::default();
        let mut records = text.split('\0').filter(|r| !r.is_empty());

        while let Some(record) = records.next() {
            let malformed = || StatusError::MalformedEntry {
                record: record.to_string(),
            };
            if let Some(header) = record.strip_prefix("# ") {
                status.read_header(header).ok_or_else(malformed)?;
                continue;
            }
            let (tag, rest) = record.split_once(' ').ok_or_else(malformed)?;
            match tag {
                "1" => {
                    let fields: Vec<&str> = rest.splitn(8, ' ').collect();
                    let [xy, .., path] = fields.as_slice() else {
                        return Err(malformed());
                    };
                    if fields.len() != 8 {
                        return Err(malformed());
                    }
                    status.classify(xy, path).ok_or_else(malformed)?;
                }
                "2" => {
                    let fields: Vec<&str> = rest.splitn(9, ' ').collect();
                    let [xy, .., path] = fields.as_slice() else {
                        return Err(malformed());
                    };
                    let original = records.next();
                    let (9, Some(original)) = (fields.len(), original) else {
                        return Err(malformed());
                    };
                    status.classify(xy, path).ok_or_else(malformed)?;
                    status
                        .renamed_from
                        .insert(path.to_string(), original.to_string());
                }
                "u" => {
                    let fields: Vec<&str> = rest.splitn(10, ' ').collect();
                    match fields.as_slice() {
                        [.., path] if fields.len() == 10 => {
                            status.conflicted.insert(path.to_string());
                        }
                        _ => return Err(malformed()),
                    }
                }
                "?" => {
                    status.untracked.insert(rest.to_string());
                }
                "!" => {}
                _ => return Err(malformed()),
            }
        }

        Ok(status)
    }

    fn read_header(&mut self, header: &str) -> Option<()> {
        let (key, value) = header.split_once(' ')?;
        match key {
            "branch.oid" => self.head = (value != "(initial)").then(|| value.to_string()),
            "branch.head" => self.branch = (value != "(detached)").then(|| value.to_string()),
            "branch.upstream" => self.upstream = Some(value.to_string()),
            "branch.ab" => {
                let (ahead, behind) = value.split_once(' ')?;
                self.ahead = ahead.strip_prefix('+')?.parse().ok()?;
                self.behind = behind.strip_prefix('-')?.parse().ok()?;
            }
            // Newer git versions add headers (e.g. stash counts)
            _ => {}
        }
        Some(())
    }

    fn classify(&mut self, xy: &str, path: &str) -> Option<()> {
        let mut codes = xy.chars();
        let (index, worktree) = (codes.next()?, codes.next()?);
        if index != '.' {
            self.staged.insert(path.to_string());
        }
        if worktree != '.' {
            self.unstaged.insert(path.to_string());
        }
        Some(())
    }

    /// No staged, unstaged, untracked or conflicted paths
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty()
            && self.unstaged.is_empty()
            && self.untracked.is_empty()
            && self.conflicted.is_empty()
    }

    pub fn is_detached(&self) -> bool {
        self.branch.is_none()
    }

    /// Has both staged and unstaged changes
    pub fn is_partially_staged(&self, path: &str) -> bool {
        self.staged.contains(path) && self.unstaged.contains(path)
    }

    pub fn tracking(&self) -> Tracking {
        let Some(upstream) = self.upstream.clone() else {
            return Tracking::NoUpstream;
        };
        match (self.ahead, self.behind) {
            (0, 0) => Tracking::UpToDate { upstream },
            (commits, 0) => Tracking::Ahead { upstream, commits },
            (0, commits) => Tracking::Behind { upstream, commits },
            (ahead, behind) => Tracking::Diverged {
                upstream,
                ahead,
                behind,
            },
        }
    }
}
