//! Git front end with hunk and line level staging.
//!
//! Every version-control operation is delegated to the `git` binary. This
//! crate parses its output, synthesizes partial patches for selective
//! staging and serializes mutating operations per repository.
//!
//! ```text
//! Session (one worker per repository, serialized mutations)
//!    |
//!    v
//! Repository ----> ProcessRunner ----> git
//!    |                  ^
//!    v                  |
//! Diff::parse      patch::build_patch  (git apply --cached)
//! ```

use error_set::error_set;

pub mod branch;
pub mod commit;
pub mod config;
pub mod diff;
pub mod history;
pub mod logging;
pub mod outcome;
pub mod parse;
pub mod patch;
pub mod process;
pub mod repo;
pub mod session;
pub mod stash;
pub mod status;
pub mod suggest;

pub use commit::{CommitDraft, CommitType, DraftError};
pub use config::{ConfigError, Settings};
pub use diff::{ChangeKind, Diff, DiffError, DiffLine, FileDiff, Hunk, HunkRange, LineKind};
pub use outcome::{Failure, Outcome};
pub use parse::ParseError;
pub use patch::{Direction, Patch, PatchError};
pub use process::{LaunchError, ProcessRunner, SystemRunner};
pub use repo::{Applied, Repository, Scope};
pub use session::{Session, Snapshot};
pub use status::{RepositoryStatus, StatusError};
pub use suggest::SuggestError;

error_set! {
    /// Top-level error for gitdeck operations
    ///
    /// Expected results of git commands (conflicts, nothing to commit, a
    /// rejected push) are not errors; they come back as [`Outcome`].
    GitDeckError := {
        #[display("Not a git repository: {path}")]
        NotARepository { path: String },
        #[display("The diff of {path} changed since it was captured; refresh and select again")]
        StaleDiff { path: String },
        #[display("No changes for {path} in the current snapshot")]
        UnknownFile { path: String },
        #[display("git {command} failed: {stderr}")]
        GitFailed { command: String, stderr: String },
        #[display("git {command} was superseded by a repository change")]
        Superseded { command: String },
        #[display("git {command} timed out")]
        TimedOut { command: String },
        #[display("Failed to read {path}: {message}")]
        ReadFailed { path: String, message: String },
        #[display("The repository session has shut down")]
        SessionClosed,
        LaunchError(LaunchError),
        DiffError(DiffError),
        PatchError(PatchError),
        ParseError(ParseError),
        StatusError(StatusError),
        DraftError(DraftError),
        ConfigError(ConfigError),
        SuggestError(SuggestError),
    }
}
