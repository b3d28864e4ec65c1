//! Results of mutating operations.
//!
//! Git refusing to do something (nothing to commit, a non-fast-forward
//! push, a merge that stops on conflicts) is an expected result rather than
//! an error, so mutating operations return an [`Outcome`] carrying a
//! [`Failure`] with guidance for the user.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    Success(T),
    /// The operation stopped with these paths in conflict
    Conflict(Vec<String>),
    Failure(Failure),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Conflict(paths) => Outcome::Conflict(paths),
            Outcome::Failure(failure) => Outcome::Failure(failure),
        }
    }
}

impl<T> From<Failure> for Outcome<T> {
    fn from(failure: Failure) -> Self {
        Outcome::Failure(failure)
    }
}

impl<T> fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(_) => write!(f, "Done"),
            Outcome::Conflict(paths) => {
                write!(f, "Conflicts in {} file(s):", paths.len())?;
                for path in paths {
                    write!(f, "\n  {path}")?;
                }
                write!(
                    f,
                    "\nResolve them, stage the results and commit, or abort the merge."
                )
            }
            Outcome::Failure(failure) => write!(f, "{failure}"),
        }
    }
}

/// Why git declined an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    NothingToCommit,
    EmptyMessage,
    NothingToStash,
    NoRemote { remote: String },
    NoUpstream { branch: String },
    DetachedHead,
    /// The remote has commits the local branch lacks
    Diverged,
    /// Local changes would be overwritten
    DirtyWorktree,
    UnknownBranch { name: String },
    BranchExists { name: String },
    InvalidBranchName { name: String, reason: String },
    NoSuchStash { index: usize },
    NoMergeInProgress,
    /// The remote could not be reached or refused authentication
    Unreachable { detail: String },
    /// `git apply` did not accept a synthesized patch
    PatchRejected { path: String, stderr: String },
    Cancelled,
    TimedOut,
    /// Any other non-zero exit
    Rejected { command: String, stderr: String },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::NothingToCommit => write!(f, "Nothing to commit. Stage some changes first."),
            Failure::EmptyMessage => write!(f, "The commit message is empty."),
            Failure::NothingToStash => write!(f, "No local changes to stash."),
            Failure::NoRemote { remote } => write!(
                f,
                "No remote named '{remote}'. Add one with `git remote add {remote} <url>`."
            ),
            Failure::NoUpstream { branch } => {
                write!(f, "Branch '{branch}' has no upstream branch to pull from.")
            }
            Failure::DetachedHead => {
                write!(f, "HEAD is detached. Check out a branch first.")
            }
            Failure::Diverged => write!(
                f,
                "The remote contains work you do not have. Pull before pushing."
            ),
            Failure::DirtyWorktree => write!(
                f,
                "Local changes would be overwritten. Commit or stash them first."
            ),
            Failure::UnknownBranch { name } => write!(f, "No branch named '{name}'."),
            Failure::BranchExists { name } => write!(f, "A branch named '{name}' already exists."),
            Failure::InvalidBranchName { name, reason } => {
                write!(f, "'{name}' is not a valid branch name: {reason}.")
            }
            Failure::NoSuchStash { index } => write!(f, "There is no stash@{{{index}}}."),
            Failure::NoMergeInProgress => write!(f, "There is no merge to abort."),
            Failure::Unreachable { detail } => write!(
                f,
                "Could not reach the remote. Check the network and your credentials.\n{detail}"
            ),
            Failure::PatchRejected { path, stderr } => write!(
                f,
                "git did not accept the patch for {path}. Refresh and try again.\n{stderr}"
            ),
            Failure::Cancelled => write!(f, "Cancelled."),
            Failure::TimedOut => write!(f, "Timed out waiting for git."),
            Failure::Rejected { command, stderr } => write!(f, "git {command} failed:\n{stderr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_lists_paths() {
        let outcome: Outcome<()> = Outcome::Conflict(vec!["a.txt".into(), "b.txt".into()]);
        insta::assert_snapshot!(outcome.to_string(), @r"
        Conflicts in 2 file(s):
          a.txt
          b.txt
        Resolve them, stage the results and commit, or abort the merge.
        ");
    }

    #[test]
    fn map_keeps_failures() {
        let outcome: Outcome<u32> = Failure::DetachedHead.into();
        assert_eq!(outcome.map(|n| n + 1), Outcome::Failure(Failure::DetachedHead));
        assert_eq!(Outcome::Success(1).map(|n| n + 1).success(), Some(2));
    }

    #[test]
    fn stash_failure_names_the_reference() {
        assert_eq!(
            Failure::NoSuchStash { index: 2 }.to_string(),
            "There is no stash@{2}."
        );
    }
}
