//! One async operation per git primitive.
//!
//! Reads return their parsed result or a [`GitDeckError`]. Mutations return
//! an [`Outcome`]: git declining to do something is reported as a
//! [`Failure`] with guidance, and operations that can stop on conflicts
//! (merge, pull, stash apply, commit) report the unmerged paths.
//!
//! ```text
//! stage hunks:  FileDiff (selected) --build_patch--> Patch
//!                  |                                   |
//!               re-read diff == snapshot?          git apply --cached [--reverse] -
//!                  no -> StaleDiff
//! ```

use crate::GitDeckError;
use crate::branch::{self, Branches, Remote};
use crate::commit::CommitDraft;
use crate::config::GitSettings;
use crate::diff::{Diff, FileDiff};
use crate::history::{self, LogEntry};
use crate::outcome::{Failure, Outcome};
use crate::parse::{LineRef, Selector, Target};
use crate::patch::{self, Direction, Patch};
use crate::process::{Exit, Invocation, ProcessOutput, ProcessRunner, SystemRunner};
use crate::stash::{self, StashEntry};
use crate::status::RepositoryStatus;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration overrides passed before every subcommand
const CONFIG_OVERRIDES: [&str; 4] = ["-c", "core.quotepath=off", "-c", "color.ui=never"];

/// Which diff a selection refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Index to working tree; applied forward to stage
    Unstaged,
    /// HEAD to index; applied in reverse to unstage
    Staged,
}

impl Scope {
    pub fn direction(self) -> Direction {
        match self {
            Scope::Unstaged => Direction::Forward,
            Scope::Staged => Direction::Reverse,
        }
    }
}

/// What a staging operation moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// No hunk was selected; git was not called
    NothingSelected,
    /// Whole files
    Files(usize),
    Hunks(usize),
    /// Individual changed lines
    Lines(usize),
}

impl fmt::Display for Applied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Applied::NothingSelected => write!(f, "nothing (no hunks selected)"),
            Applied::Files(n) => write!(f, "{n} file(s)"),
            Applied::Hunks(n) => write!(f, "{n} hunk(s)"),
            Applied::Lines(n) => write!(f, "{n} line(s)"),
        }
    }
}

/// A working tree driven through the `git` binary
#[derive(Debug, Clone)]
pub struct Repository<R: ProcessRunner = SystemRunner> {
    root: PathBuf,
    runner: R,
    git: GitSettings,
    cancel: CancellationToken,
}

impl Repository<SystemRunner> {
    /// Open the repository containing `path`.
    pub async fn open(path: impl AsRef<Path>, git: GitSettings) -> Result<Self, GitDeckError> {
        Self::discover(SystemRunner, path, git).await
    }
}

impl<R: ProcessRunner> Repository<R> {
    /// Find the top level of the working tree containing `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GitDeckError::NotARepository`] if `path` is not a directory
    /// inside a working tree.
    pub async fn discover(
        runner: R,
        path: impl AsRef<Path>,
        git: GitSettings,
    ) -> Result<Self, GitDeckError> {
        let path = path.as_ref();
        let not_a_repository = || GitDeckError::NotARepository {
            path: path.display().to_string(),
        };
        if !path.is_dir() {
            return Err(not_a_repository());
        }
        let probe = Self::with_root(runner, path, git);
        let top = match probe.read(["rev-parse", "--show-toplevel"]).await {
            Ok(top) => top,
            Err(GitDeckError::GitFailed { .. }) => return Err(not_a_repository()),
            Err(e) => return Err(e),
        };
        let top = top.trim();
        if top.is_empty() {
            return Err(not_a_repository());
        }
        debug!(root = top, "opened repository");
        Ok(Self {
            root: PathBuf::from(top),
            ..probe
        })
    }

    /// Use `root` as the top level without asking git.
    pub fn with_root(runner: R, root: impl Into<PathBuf>, git: GitSettings) -> Self {
        Self {
            root: root.into(),
            runner,
            git,
            cancel: CancellationToken::new(),
        }
    }

    /// A handle whose commands are killed when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &GitSettings {
        &self.git
    }

    // --- invocation plumbing ---

    fn git<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(&self.git.binary, &self.root)
            .args(CONFIG_OVERRIDES)
            .args(args)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", ":")
            .timeout(self.git.command_timeout())
    }

    fn network_git<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.git(args).timeout(self.git.network_timeout())
    }

    async fn exec(&self, invocation: Invocation) -> Result<ProcessOutput, GitDeckError> {
        Ok(self.runner.run(invocation, self.cancel.clone()).await?)
    }

    /// Run a read-only command and return its stdout.
    async fn read<I, S>(&self, args: I) -> Result<String, GitDeckError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.probe(args).await?.unwrap_or_default())
    }

    /// Like [`Self::read`], but exit status 1 means "no answer" and gives `None`.
    async fn probe<I, S>(&self, args: I) -> Result<Option<String>, GitDeckError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let invocation = self.git(args);
        let command = invocation.subcommand();
        let output = self.exec(invocation).await?;
        match output.exit {
            Exit::Code(0) => Ok(Some(decode(&command, output.stdout))),
            Exit::Code(1) if output.stderr.is_empty() => Ok(None),
            Exit::Cancelled => Err(GitDeckError::Superseded { command }),
            Exit::TimedOut => Err(GitDeckError::TimedOut { command }),
            Exit::Code(_) | Exit::Signaled => Err(GitDeckError::GitFailed {
                command,
                stderr: output.stderr_lossy().trim().to_string(),
            }),
        }
    }

    /// Run a mutating command. `subject` names the branch, remote or path
    /// the command acts on, for failure messages.
    async fn mutate(
        &self,
        invocation: Invocation,
        subject: &str,
    ) -> Result<Outcome<ProcessOutput>, GitDeckError> {
        let command = invocation.subcommand();
        let output = self.exec(invocation).await?;
        Ok(match output.exit {
            Exit::Code(0) => {
                info!(command = %command, subject, "completed");
                Outcome::Success(output)
            }
            Exit::Cancelled => {
                warn!(command = %command, "cancelled");
                Failure::Cancelled.into()
            }
            Exit::TimedOut => {
                warn!(command = %command, "timed out");
                Failure::TimedOut.into()
            }
            Exit::Code(_) | Exit::Signaled => {
                let failure = classify(&command, subject, &output);
                warn!(command = %command, %failure, "git declined");
                failure.into()
            }
        })
    }

    /// Replace a failure by a conflict when git left unmerged paths behind.
    async fn with_conflicts<T>(&self, outcome: Outcome<T>) -> Result<Outcome<T>, GitDeckError> {
        let Outcome::Failure(failure) = outcome else {
            return Ok(outcome);
        };
        if matches!(failure, Failure::Cancelled | Failure::TimedOut) {
            return Ok(failure.into());
        }
        let paths = self.conflicted_paths().await?;
        if paths.is_empty() {
            Ok(failure.into())
        } else {
            warn!(count = paths.len(), "stopped on conflicts");
            Ok(Outcome::Conflict(paths))
        }
    }

    // --- reads ---

    pub async fn status(&self) -> Result<RepositoryStatus, GitDeckError> {
        let text = self
            .read(["status", "--porcelain=v2", "--branch", "-z"])
            .await?;
        Ok(RepositoryStatus::parse(&text)?)
    }

    fn diff_args(&self, scope: Scope, paths: &[String]) -> Vec<String> {
        let mut args: Vec<String> = [
            "diff",
            "--no-ext-diff",
            "--no-color",
            "--no-textconv",
            "--src-prefix=a/",
            "--dst-prefix=b/",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        args.push(format!("-U{}", self.git.context_lines));
        if scope == Scope::Staged {
            args.push("--cached".to_string());
        }
        args.push("--".to_string());
        args.extend(paths.iter().cloned());
        args
    }

    /// Raw diff text of `scope`, limited to `paths` when not empty
    pub async fn diff_text(&self, scope: Scope, paths: &[String]) -> Result<String, GitDeckError> {
        self.read(self.diff_args(scope, paths)).await
    }

    pub async fn diff(&self, scope: Scope, paths: &[String]) -> Result<Diff, GitDeckError> {
        let text = self.diff_text(scope, paths).await?;
        Ok(Diff::parse(&text)?)
    }

    /// Everything staged for the next commit, as suggestion input
    pub async fn staged_diff_text(&self) -> Result<String, GitDeckError> {
        self.diff_text(Scope::Staged, &[]).await
    }

    pub async fn is_clean(&self) -> Result<bool, GitDeckError> {
        Ok(self.status().await?.is_clean())
    }

    /// Paths with unresolved merge conflicts
    pub async fn conflicted_paths(&self) -> Result<Vec<String>, GitDeckError> {
        let text = self
            .read(["diff", "--name-only", "--diff-filter=U", "-z"])
            .await?;
        let mut paths: Vec<String> = text
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        paths.dedup();
        Ok(paths)
    }

    /// Whether a merge is waiting to be concluded or aborted
    pub async fn in_merge(&self) -> Result<bool, GitDeckError> {
        Ok(self
            .probe(["rev-parse", "-q", "--verify", "MERGE_HEAD"])
            .await?
            .is_some())
    }

    /// Git's prepared message for concluding the current merge
    pub async fn merge_message(&self) -> Result<Option<String>, GitDeckError> {
        let relative = self.read(["rev-parse", "--git-path", "MERGE_MSG"]).await?;
        let path = self.root.join(relative.trim());
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GitDeckError::ReadFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    pub async fn stashes(&self) -> Result<Vec<StashEntry>, GitDeckError> {
        let text = self.read(["stash", "list", stash::STASH_FORMAT]).await?;
        Ok(stash::parse_stash_list(&text))
    }

    pub async fn branches(&self) -> Result<Branches, GitDeckError> {
        let refs = self
            .read(["for-each-ref", branch::REF_FORMAT, "refs/heads", "refs/remotes"])
            .await?;
        let current = self.current_branch().await?;
        Ok(Branches::parse(&refs, current))
    }

    /// Checked-out branch; `None` when HEAD is detached
    pub async fn current_branch(&self) -> Result<Option<String>, GitDeckError> {
        Ok(self
            .probe(["symbolic-ref", "-q", "--short", "HEAD"])
            .await?
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty()))
    }

    /// The last `count` commits of HEAD; empty on an unborn branch
    pub async fn recent_history(&self, count: usize) -> Result<Vec<LogEntry>, GitDeckError> {
        match self
            .read(["log".to_string(), format!("-n{count}"), history::LOG_FORMAT.to_string()])
            .await
        {
            Ok(text) => Ok(history::parse_log(&text)),
            Err(GitDeckError::GitFailed { stderr, .. })
                if stderr.contains("does not have any commits yet") =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn remotes(&self) -> Result<Vec<Remote>, GitDeckError> {
        let text = self.read(["remote", "-v"]).await?;
        Ok(branch::parse_remotes(&text))
    }

    /// Value of a configuration key; `None` when unset
    pub async fn get_config(&self, key: &str) -> Result<Option<String>, GitDeckError> {
        Ok(self
            .probe(["config", "--get", key])
            .await?
            .map(|value| value.trim_end().to_string()))
    }

    /// Configured `user.name` and `user.email`
    pub async fn user_identity(&self) -> Result<(Option<String>, Option<String>), GitDeckError> {
        Ok((
            self.get_config("user.name").await?,
            self.get_config("user.email").await?,
        ))
    }

    // --- staging ---

    pub async fn stage_paths(&self, paths: &[String]) -> Result<Outcome<Applied>, GitDeckError> {
        let subject = paths.join(" ");
        let invocation = self.git(["add", "--"]).args(paths.iter().cloned());
        Ok(self
            .mutate(invocation, &subject)
            .await?
            .map(|_| Applied::Files(paths.len())))
    }

    pub async fn unstage_paths(&self, paths: &[String]) -> Result<Outcome<Applied>, GitDeckError> {
        let subject = paths.join(" ");
        let invocation = self.git(["reset", "-q", "--"]).args(paths.iter().cloned());
        Ok(self
            .mutate(invocation, &subject)
            .await?
            .map(|_| Applied::Files(paths.len())))
    }

    /// Apply the selected hunks of `file`, a file of the `scope` diff.
    ///
    /// Nothing selected is a no-op that never calls git.
    ///
    /// # Errors
    ///
    /// Returns [`GitDeckError::StaleDiff`] if the file's diff changed since
    /// `file` was captured.
    pub async fn apply_selection(
        &self,
        scope: Scope,
        file: &FileDiff,
    ) -> Result<Outcome<Applied>, GitDeckError> {
        let Some(patch) = patch::build_patch(file, scope.direction())? else {
            debug!(path = %file.path, "no hunks selected");
            return Ok(Outcome::Success(Applied::NothingSelected));
        };
        self.ensure_fresh(scope, file).await?;
        let hunks = patch.hunks.len();
        Ok(self.apply_patch(&patch).await?.map(|()| Applied::Hunks(hunks)))
    }

    /// Apply only the changed lines of `file` matched by `refs`.
    pub async fn apply_lines(
        &self,
        scope: Scope,
        file: &FileDiff,
        refs: &[LineRef],
    ) -> Result<Outcome<Applied>, GitDeckError> {
        let context = usize::try_from(self.git.context_lines).unwrap_or(usize::MAX);
        let patch = patch::build_line_patch(file, scope.direction(), refs, context)?;
        self.ensure_fresh(scope, file).await?;
        let lines = patch
            .hunks
            .iter()
            .map(|h| h.additions() + h.deletions())
            .sum();
        Ok(self.apply_patch(&patch).await?.map(|()| Applied::Lines(lines)))
    }

    /// Stage (or unstage, for [`Scope::Staged`]) what a parsed target names.
    pub async fn apply_target(
        &self,
        scope: Scope,
        target: &Target,
    ) -> Result<Outcome<Applied>, GitDeckError> {
        let paths = std::slice::from_ref(&target.path);
        match &target.selector {
            Selector::All => match scope {
                Scope::Unstaged => self.stage_paths(paths).await,
                Scope::Staged => self.unstage_paths(paths).await,
            },
            Selector::Hunks(indices) => {
                let mut file = self.file_diff(scope, &target.path).await?;
                for index in indices {
                    file.select(index.get() - 1, true)?;
                }
                self.apply_selection(scope, &file).await
            }
            Selector::Lines(refs) => {
                let file = self.file_diff(scope, &target.path).await?;
                self.apply_lines(scope, &file, refs).await
            }
        }
    }

    async fn file_diff(&self, scope: Scope, path: &str) -> Result<FileDiff, GitDeckError> {
        self.diff(scope, &[path.to_string()])
            .await?
            .files
            .into_iter()
            .find(|f| f.path == path)
            .ok_or_else(|| GitDeckError::UnknownFile {
                path: path.to_string(),
            })
    }

    /// Reject the apply if the diff of `file` is no longer what was shown.
    async fn ensure_fresh(&self, scope: Scope, file: &FileDiff) -> Result<(), GitDeckError> {
        let mut paths: Vec<String> = file.old_path.iter().cloned().collect();
        paths.push(file.path.clone());
        let current = self.diff(scope, &paths).await?;
        match current.file(&file.path) {
            Some(now) if now.same_changes(file) => Ok(()),
            _ => {
                warn!(path = %file.path, "diff changed since it was captured");
                Err(GitDeckError::StaleDiff {
                    path: file.path.clone(),
                })
            }
        }
    }

    async fn apply_patch(&self, patch: &Patch) -> Result<Outcome<()>, GitDeckError> {
        let mut args = vec!["apply", "--cached", "--whitespace=nowarn"];
        if patch.direction == Direction::Reverse {
            args.push("--reverse");
        }
        if patch.has_zero_context() {
            args.push("--unidiff-zero");
        }
        args.push("-");
        let invocation = self.git(args).stdin(patch.to_string());
        let command = invocation.subcommand();
        let output = self.exec(invocation).await?;
        Ok(match output.exit {
            Exit::Code(0) => {
                info!(path = %patch.path, hunks = patch.hunks.len(), "applied patch");
                Outcome::Success(())
            }
            Exit::Cancelled => Failure::Cancelled.into(),
            Exit::TimedOut => Failure::TimedOut.into(),
            Exit::Code(_) | Exit::Signaled => {
                let stderr = output.stderr_lossy().trim().to_string();
                warn!(command = %command, path = %patch.path, %stderr, "patch rejected");
                Failure::PatchRejected {
                    path: patch.path.clone(),
                    stderr,
                }
                .into()
            }
        })
    }

    // --- commits ---

    /// Commit the index with `message`, returning the new abbreviated hash.
    pub async fn commit(&self, message: &str) -> Result<Outcome<String>, GitDeckError> {
        if message.trim().is_empty() {
            return Ok(Failure::EmptyMessage.into());
        }
        let invocation = self.git(["commit", "-F", "-"]).stdin(message);
        let outcome = self.mutate(invocation, "").await?;
        let outcome = self.with_conflicts(outcome).await?;
        if !outcome.is_success() {
            return Ok(outcome.map(|_| String::new()));
        }
        let hash = self.read(["rev-parse", "--short", "HEAD"]).await?;
        Ok(Outcome::Success(hash.trim().to_string()))
    }

    pub async fn commit_draft(&self, draft: &CommitDraft) -> Result<Outcome<String>, GitDeckError> {
        let message = draft.message()?;
        self.commit(&message).await
    }

    // --- remotes ---

    /// Push the current branch to `origin`, setting the upstream on first push.
    pub async fn push(&self) -> Result<Outcome<()>, GitDeckError> {
        let remotes = self.remotes().await?;
        if !remotes
            .iter()
            .any(|r| r.name == "origin" && r.push_url.is_some())
        {
            return Ok(Failure::NoRemote {
                remote: "origin".to_string(),
            }
            .into());
        }
        let status = self.status().await?;
        let Some(branch) = status.branch else {
            return Ok(Failure::DetachedHead.into());
        };
        let invocation = if status.upstream.is_some() {
            self.network_git(["push"])
        } else {
            info!(%branch, "first push, setting upstream to origin");
            self.network_git(["push", "--set-upstream", "origin", branch.as_str()])
        };
        Ok(self.mutate(invocation, &branch).await?.map(|_| ()))
    }

    pub async fn pull(&self) -> Result<Outcome<()>, GitDeckError> {
        let status = self.status().await?;
        let Some(branch) = status.branch else {
            return Ok(Failure::DetachedHead.into());
        };
        if status.upstream.is_none() {
            return Ok(Failure::NoUpstream { branch }.into());
        }
        // Merge rather than refuse when the histories diverged, so
        // conflicting changes surface as a conflict
        let outcome = self
            .mutate(self.network_git(["pull", "--no-rebase", "--no-edit"]), &branch)
            .await?;
        self.with_conflicts(outcome.map(|_| ())).await
    }

    pub async fn fetch(&self) -> Result<Outcome<()>, GitDeckError> {
        Ok(self
            .mutate(self.network_git(["fetch"]), "")
            .await?
            .map(|_| ()))
    }

    // --- branches and merges ---

    pub async fn checkout(&self, name: &str) -> Result<Outcome<()>, GitDeckError> {
        Ok(self
            .mutate(self.git(["checkout", name, "--"]), name)
            .await?
            .map(|_| ()))
    }

    /// Create branch `name` at HEAD and check it out.
    pub async fn create_branch(&self, name: &str) -> Result<Outcome<()>, GitDeckError> {
        if let Err(reason) = branch::validate_branch_name(name) {
            return Ok(Failure::InvalidBranchName {
                name: name.to_string(),
                reason,
            }
            .into());
        }
        Ok(self
            .mutate(self.git(["checkout", "-b", name]), name)
            .await?
            .map(|_| ()))
    }

    pub async fn merge(&self, name: &str) -> Result<Outcome<()>, GitDeckError> {
        let outcome = self
            .mutate(self.git(["merge", "--no-edit", name]), name)
            .await?;
        self.with_conflicts(outcome.map(|_| ())).await
    }

    pub async fn abort_merge(&self) -> Result<Outcome<()>, GitDeckError> {
        if !self.in_merge().await? {
            return Ok(Failure::NoMergeInProgress.into());
        }
        Ok(self
            .mutate(self.git(["merge", "--abort"]), "")
            .await?
            .map(|_| ()))
    }

    // --- stashes ---

    pub async fn stash_push(&self, message: Option<&str>) -> Result<Outcome<()>, GitDeckError> {
        let mut args = vec!["stash", "push"];
        if let Some(message) = message.filter(|m| !m.trim().is_empty()) {
            args.extend(["-m", message]);
        }
        let outcome = self.mutate(self.git(args), "").await?;
        // Exit status is 0 even when there was nothing to save
        Ok(match outcome {
            Outcome::Success(output) if output.combined().contains("No local changes to save") => {
                Failure::NothingToStash.into()
            }
            other => other.map(|_| ()),
        })
    }

    /// Apply stash `index`, keeping the entry.
    pub async fn stash_apply(&self, index: usize) -> Result<Outcome<()>, GitDeckError> {
        let Some(reference) = self.stash_reference(index).await? else {
            return Ok(Failure::NoSuchStash { index }.into());
        };
        let outcome = self
            .mutate(self.git(["stash", "apply", reference.as_str()]), &reference)
            .await?;
        self.with_conflicts(outcome.map(|_| ())).await
    }

    pub async fn stash_drop(&self, index: usize) -> Result<Outcome<()>, GitDeckError> {
        let Some(reference) = self.stash_reference(index).await? else {
            return Ok(Failure::NoSuchStash { index }.into());
        };
        Ok(self
            .mutate(self.git(["stash", "drop", "-q", reference.as_str()]), &reference)
            .await?
            .map(|_| ()))
    }

    async fn stash_reference(&self, index: usize) -> Result<Option<String>, GitDeckError> {
        Ok(self
            .stashes()
            .await?
            .into_iter()
            .find(|s| s.index == index)
            .map(|s| s.reference))
    }

    // --- configuration ---

    /// Set `user.name` and/or `user.email` for this repository only.
    pub async fn set_user_config(
        &self,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Outcome<()>, GitDeckError> {
        for (key, value) in [("user.name", name), ("user.email", email)] {
            let Some(value) = value else { continue };
            let outcome = self
                .mutate(self.git(["config", "--local", key, value]), key)
                .await?;
            if !outcome.is_success() {
                return Ok(outcome.map(|_| ()));
            }
        }
        Ok(Outcome::Success(()))
    }

    /// Timeout applied to network commands
    pub fn network_timeout(&self) -> Duration {
        self.git.network_timeout()
    }
}

/// Output as text. Paths that are not UTF-8 are kept readable with
/// replacement characters rather than failing the whole read.
fn decode(command: &str, bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!(%command, error = %e.utf8_error(), "output is not valid UTF-8, decoding lossily");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}

/// Map git's explanation of a non-zero exit to a [`Failure`].
///
/// Messages are matched in the C locale, which every invocation forces.
fn classify(command: &str, subject: &str, output: &ProcessOutput) -> Failure {
    let text = output.combined();
    let lower = text.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    let first_line = |s: &str| {
        s.lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string()
    };

    if has(&["nothing to commit", "no changes added to commit"]) {
        Failure::NothingToCommit
    } else if has(&["empty commit message"]) {
        Failure::EmptyMessage
    } else if has(&["no local changes to save"]) {
        Failure::NothingToStash
    } else if has(&[
        "non-fast-forward",
        "fetch first",
        "updates were rejected",
        "divergent branches",
        "need to specify how to reconcile",
        "not possible to fast-forward",
    ]) {
        Failure::Diverged
    } else if has(&[
        "would be overwritten",
        "please commit your changes or stash them",
    ]) {
        Failure::DirtyWorktree
    } else if has(&["there is no tracking information"]) {
        Failure::NoUpstream {
            branch: subject.to_string(),
        }
    } else if has(&["you are not currently on a branch"]) {
        Failure::DetachedHead
    } else if has(&["already exists"]) && command == "checkout" {
        Failure::BranchExists {
            name: subject.to_string(),
        }
    } else if has(&[
        "did not match any file(s) known to git",
        "invalid reference",
        "not something we can merge",
    ]) {
        Failure::UnknownBranch {
            name: subject.to_string(),
        }
    } else if has(&["there is no merge to abort"]) {
        Failure::NoMergeInProgress
    } else if has(&[
        "could not read from remote repository",
        "could not resolve host",
        "unable to access",
        "authentication failed",
        "repository not found",
        "does not appear to be a git repository",
    ]) {
        Failure::Unreachable {
            detail: first_line(&output.stderr_lossy()),
        }
    } else {
        let stderr = output.stderr_lossy();
        let detail = if stderr.trim().is_empty() {
            output.stdout_lossy().trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        Failure::Rejected {
            command: command.to_string(),
            stderr: detail,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::parse::parse_target;
    use crate::process::fake::FakeRunner;
    use similar_asserts::assert_eq;

    const TWO_HUNKS: &str = "diff --git a/f.txt b/f.txt
index 1111111..2222222 100644
--- a/f.txt
+++ b/f.txt
@@ -1,3 +1,3 @@
 a
-b
+B
 c
@@ -10,3 +10,4 @@
 j
 k
+inserted
 l
";

    const DIFF: [&str; 2] = ["diff", "--no-ext-diff"];
    const CONFLICTS: [&str; 2] = ["diff", "--name-only"];

    fn repo(fake: &FakeRunner) -> Repository<FakeRunner> {
        Repository::with_root(fake.clone(), "/repo", GitSettings::default())
    }

    fn status_record(lines: &[&str]) -> String {
        lines.iter().map(|l| format!("{l}\0")).collect()
    }

    #[tokio::test]
    async fn every_invocation_forces_a_stable_environment() {
        let fake = FakeRunner::default();
        fake.on(&["status"], ProcessOutput::ok(status_record(&["# branch.oid (initial)", "# branch.head main"])));
        repo(&fake).status().await.unwrap();

        let invocation = &fake.invocations()[0];
        assert_eq!(&invocation.args[..4], CONFIG_OVERRIDES);
        for (key, value) in [("LC_ALL", "C"), ("GIT_TERMINAL_PROMPT", "0"), ("GIT_EDITOR", ":")] {
            assert!(invocation.env.contains(&(key.to_string(), value.to_string())), "{key}");
        }
        assert_eq!(invocation.timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn zero_selection_never_calls_git() {
        let fake = FakeRunner::default();
        let file = FileDiff::parse(TWO_HUNKS).unwrap();
        let outcome = repo(&fake)
            .apply_selection(Scope::Unstaged, &file)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Success(Applied::NothingSelected));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn selected_hunk_is_applied_to_the_index() {
        let fake = FakeRunner::default();
        fake.on(&DIFF, ProcessOutput::ok(TWO_HUNKS));
        fake.on(&["apply"], ProcessOutput::ok(""));
        let mut file = FileDiff::parse(TWO_HUNKS).unwrap();
        file.select(1, true).unwrap();

        let outcome = repo(&fake)
            .apply_selection(Scope::Unstaged, &file)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Success(Applied::Hunks(1)));

        let apply = fake
            .invocations()
            .into_iter()
            .find(|i| i.subcommand() == "apply")
            .unwrap();
        assert_eq!(
            apply.command_args(),
            ["apply", "--cached", "--whitespace=nowarn", "-"]
        );
        insta::assert_snapshot!(apply.stdin.unwrap(), @r"
        diff --git a/f.txt b/f.txt
        index 1111111..2222222 100644
        --- a/f.txt
        +++ b/f.txt
        @@ -10,3 +10,4 @@
         j
         k
        +inserted
         l
        ");
    }

    #[tokio::test]
    async fn unstaging_applies_in_reverse() {
        let fake = FakeRunner::default();
        fake.on(&DIFF, ProcessOutput::ok(TWO_HUNKS));
        fake.on(&["apply"], ProcessOutput::ok(""));
        let mut file = FileDiff::parse(TWO_HUNKS).unwrap();
        file.select_all();

        let outcome = repo(&fake)
            .apply_selection(Scope::Staged, &file)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Success(Applied::Hunks(2)));
        assert!(fake.called(&["diff", "--no-ext-diff", "--no-color", "--no-textconv", "--src-prefix=a/", "--dst-prefix=b/", "-U3", "--cached"]));
        assert!(fake.called(&["apply", "--cached", "--whitespace=nowarn", "--reverse", "-"]));
    }

    #[tokio::test]
    async fn changed_diff_is_stale() {
        let fake = FakeRunner::default();
        fake.on(&DIFF, ProcessOutput::ok(TWO_HUNKS.replace("+inserted", "+edited")));
        let mut file = FileDiff::parse(TWO_HUNKS).unwrap();
        file.select(0, true).unwrap();

        let result = repo(&fake).apply_selection(Scope::Unstaged, &file).await;
        assert!(matches!(result, Err(GitDeckError::StaleDiff { path }) if path == "f.txt"));
        assert!(!fake.called(&["apply"]));
    }

    #[tokio::test]
    async fn rejected_patch_is_a_failure() {
        let fake = FakeRunner::default();
        fake.on(&DIFF, ProcessOutput::ok(TWO_HUNKS));
        fake.on(&["apply"], ProcessOutput::failed(1, "error: patch failed: f.txt:10\n"));
        let mut file = FileDiff::parse(TWO_HUNKS).unwrap();
        file.select(0, true).unwrap();

        let outcome = repo(&fake)
            .apply_selection(Scope::Unstaged, &file)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Failure(Failure::PatchRejected {
                path: "f.txt".into(),
                stderr: "error: patch failed: f.txt:10".into(),
            })
        );
    }

    #[tokio::test]
    async fn line_target_stages_only_the_named_line() {
        let fake = FakeRunner::default();
        fake.on(&DIFF, ProcessOutput::ok(TWO_HUNKS));
        fake.on(&["apply"], ProcessOutput::ok(""));

        let target = parse_target("f.txt:12").unwrap();
        let outcome = repo(&fake)
            .apply_target(Scope::Unstaged, &target)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Success(Applied::Lines(1)));
        let stdin = fake
            .invocations()
            .into_iter()
            .find_map(|i| i.stdin)
            .unwrap();
        assert!(stdin.contains("+inserted"));
        assert!(!stdin.contains("+B"));
    }

    #[tokio::test]
    async fn whole_file_target_uses_add() {
        let fake = FakeRunner::default();
        fake.on(&["add"], ProcessOutput::ok(""));
        let target = parse_target("f.txt").unwrap();
        let outcome = repo(&fake)
            .apply_target(Scope::Unstaged, &target)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Success(Applied::Files(1)));
        assert_eq!(fake.calls(), vec![vec!["add", "--", "f.txt"]]);
    }

    #[tokio::test]
    async fn nothing_to_commit() {
        let fake = FakeRunner::default();
        fake.on(
            &["commit"],
            ProcessOutput::new(
                Exit::Code(1),
                "On branch main\nnothing to commit, working tree clean\n",
                "",
            ),
        );
        fake.on(&CONFLICTS, ProcessOutput::ok(""));
        let outcome = repo(&fake).commit("feat: x").await.unwrap();
        assert_eq!(outcome, Outcome::Failure(Failure::NothingToCommit));
    }

    #[tokio::test]
    async fn empty_message_never_calls_git() {
        let fake = FakeRunner::default();
        let outcome = repo(&fake).commit(" \n").await.unwrap();
        assert_eq!(outcome, Outcome::Failure(Failure::EmptyMessage));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn commit_sends_message_on_stdin_and_returns_hash() {
        let fake = FakeRunner::default();
        fake.on(&["commit"], ProcessOutput::ok("[main 1a2b3c4] feat: x\n"));
        fake.on(&["rev-parse", "--short"], ProcessOutput::ok("1a2b3c4\n"));
        let outcome = repo(&fake).commit("feat: x\n\nbody").await.unwrap();
        assert_eq!(outcome, Outcome::Success("1a2b3c4".to_string()));
        assert_eq!(
            fake.invocations()[0].stdin.as_deref(),
            Some("feat: x\n\nbody")
        );
    }

    #[tokio::test]
    async fn merge_stopping_on_conflicts_lists_paths() {
        let fake = FakeRunner::default();
        fake.on(
            &["merge"],
            ProcessOutput::new(
                Exit::Code(1),
                "CONFLICT (content): Merge conflict in a.txt\nAutomatic merge failed\n",
                "",
            ),
        );
        fake.on(&CONFLICTS, ProcessOutput::ok("a.txt\0b.txt\0"));
        let outcome = repo(&fake).merge("feature").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Conflict(vec!["a.txt".to_string(), "b.txt".to_string()])
        );
    }

    #[tokio::test]
    async fn merge_of_unknown_branch() {
        let fake = FakeRunner::default();
        fake.on(&["merge"], ProcessOutput::failed(1, "merge: nope - not something we can merge\n"));
        fake.on(&CONFLICTS, ProcessOutput::ok(""));
        let outcome = repo(&fake).merge("nope").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Failure(Failure::UnknownBranch { name: "nope".into() })
        );
    }

    #[tokio::test]
    async fn push_requires_origin() {
        let fake = FakeRunner::default();
        fake.on(&["remote", "-v"], ProcessOutput::ok(""));
        let outcome = repo(&fake).push().await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Failure(Failure::NoRemote {
                remote: "origin".into()
            })
        );
        assert!(!fake.called(&["push"]));
    }

    #[tokio::test]
    async fn first_push_sets_upstream() {
        let fake = FakeRunner::default();
        fake.on(
            &["remote", "-v"],
            ProcessOutput::ok("origin\t/srv/x.git (fetch)\norigin\t/srv/x.git (push)\n"),
        );
        fake.on(
            &["status"],
            ProcessOutput::ok(status_record(&["# branch.oid abc", "# branch.head topic"])),
        );
        fake.on(&["push"], ProcessOutput::ok(""));
        let outcome = repo(&fake).push().await.unwrap();
        assert!(outcome.is_success());
        assert!(fake.called(&["push", "--set-upstream", "origin", "topic"]));
        let push = fake
            .invocations()
            .into_iter()
            .find(|i| i.subcommand() == "push")
            .unwrap();
        assert_eq!(push.timeout, Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn rejected_push_means_diverged() {
        let fake = FakeRunner::default();
        fake.on(
            &["remote", "-v"],
            ProcessOutput::ok("origin\t/srv/x.git (fetch)\norigin\t/srv/x.git (push)\n"),
        );
        fake.on(
            &["status"],
            ProcessOutput::ok(status_record(&[
                "# branch.oid abc",
                "# branch.head main",
                "# branch.upstream origin/main",
                "# branch.ab +1 -1",
            ])),
        );
        fake.on(
            &["push"],
            ProcessOutput::failed(1, " ! [rejected]        main -> main (fetch first)\nerror: failed to push some refs\n"),
        );
        let outcome = repo(&fake).push().await.unwrap();
        assert_eq!(outcome, Outcome::Failure(Failure::Diverged));
        assert!(fake.called(&["push"]));
        assert!(!fake.called(&["push", "--set-upstream"]));
    }

    #[tokio::test]
    async fn pull_without_upstream() {
        let fake = FakeRunner::default();
        fake.on(
            &["status"],
            ProcessOutput::ok(status_record(&["# branch.oid abc", "# branch.head main"])),
        );
        let outcome = repo(&fake).pull().await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Failure(Failure::NoUpstream {
                branch: "main".into()
            })
        );
    }

    #[tokio::test]
    async fn non_utf8_paths_are_decoded_lossily() {
        let fake = FakeRunner::default();
        fake.on(&CONFLICTS, ProcessOutput::ok(b"caf\xe9.txt\0notes.txt\0".to_vec()));
        let paths = repo(&fake).conflicted_paths().await.unwrap();
        assert_eq!(paths, ["caf\u{fffd}.txt", "notes.txt"]);
    }

    #[tokio::test]
    async fn pull_refused_on_divergent_branches() {
        let fake = FakeRunner::default();
        fake.on(
            &["status"],
            ProcessOutput::ok(status_record(&[
                "# branch.oid abc",
                "# branch.head main",
                "# branch.upstream origin/main",
                "# branch.ab +1 -1",
            ])),
        );
        fake.on(
            &["pull"],
            ProcessOutput::failed(
                128,
                "hint: You have divergent branches and need to specify how to reconcile them.\n\
                 fatal: Need to specify how to reconcile divergent branches.\n",
            ),
        );
        fake.on(&CONFLICTS, ProcessOutput::ok(""));
        let outcome = repo(&fake).pull().await.unwrap();
        assert_eq!(outcome, Outcome::Failure(Failure::Diverged));
        assert!(fake.called(&["pull", "--no-rebase", "--no-edit"]));
    }

    #[tokio::test]
    async fn invalid_branch_name_never_calls_git() {
        let fake = FakeRunner::default();
        let outcome = repo(&fake).create_branch("bad..name").await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::Failure(Failure::InvalidBranchName { .. })
        ));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn existing_branch() {
        let fake = FakeRunner::default();
        fake.on(
            &["checkout", "-b"],
            ProcessOutput::failed(128, "fatal: a branch named 'main' already exists\n"),
        );
        let outcome = repo(&fake).create_branch("main").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Failure(Failure::BranchExists { name: "main".into() })
        );
    }

    #[tokio::test]
    async fn stash_with_nothing_to_save() {
        let fake = FakeRunner::default();
        fake.on(&["stash", "push"], ProcessOutput::ok("No local changes to save\n"));
        let outcome = repo(&fake).stash_push(Some("wip")).await.unwrap();
        assert_eq!(outcome, Outcome::Failure(Failure::NothingToStash));
        assert!(fake.called(&["stash", "push", "-m", "wip"]));
    }

    #[tokio::test]
    async fn apply_of_missing_stash() {
        let fake = FakeRunner::default();
        fake.on(
            &["stash", "list"],
            ProcessOutput::ok("stash@{0}\x1f1700000000\x1fOn main: wip\n"),
        );
        let outcome = repo(&fake).stash_apply(3).await.unwrap();
        assert_eq!(outcome, Outcome::Failure(Failure::NoSuchStash { index: 3 }));
        assert!(!fake.called(&["stash", "apply"]));
    }

    #[tokio::test]
    async fn abort_without_merge() {
        let fake = FakeRunner::default();
        fake.on(&["rev-parse", "-q"], ProcessOutput::failed(1, ""));
        let outcome = repo(&fake).abort_merge().await.unwrap();
        assert_eq!(outcome, Outcome::Failure(Failure::NoMergeInProgress));
    }

    #[tokio::test]
    async fn unset_config_is_none() {
        let fake = FakeRunner::default();
        fake.on(&["config", "--get", "user.name"], ProcessOutput::ok("Ada Lovelace\n"));
        fake.on(&["config", "--get"], ProcessOutput::failed(1, ""));
        let identity = repo(&fake).user_identity().await.unwrap();
        assert_eq!(identity, (Some("Ada Lovelace".to_string()), None));
    }

    #[tokio::test]
    async fn history_of_unborn_branch_is_empty() {
        let fake = FakeRunner::default();
        fake.on(
            &["log"],
            ProcessOutput::failed(
                128,
                "fatal: your current branch 'main' does not have any commits yet\n",
            ),
        );
        assert!(repo(&fake).recent_history(7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_mutation_and_superseded_read() {
        let fake = FakeRunner::default();
        let token = CancellationToken::new();
        token.cancel();
        let cancelled = repo(&fake).with_cancellation(token);

        let outcome = cancelled.merge("feature").await.unwrap();
        assert_eq!(outcome, Outcome::Failure(Failure::Cancelled));

        let read = cancelled.status().await;
        assert!(matches!(read, Err(GitDeckError::Superseded { command }) if command == "status"));
    }

    #[test]
    fn unknown_failures_keep_stderr() {
        let output = ProcessOutput::failed(128, "fatal: something odd\n");
        assert_eq!(
            classify("gc", "", &output),
            Failure::Rejected {
                command: "gc".into(),
                stderr: "fatal: something odd".into(),
            }
        );
    }

    #[test]
    fn unreachable_remote_keeps_first_line() {
        let output = ProcessOutput::failed(
            128,
            "fatal: unable to access 'https://example.invalid/x.git/': Could not resolve host\n",
        );
        assert!(matches!(
            classify("fetch", "", &output),
            Failure::Unreachable { detail } if detail.starts_with("fatal: unable to access")
        ));
    }
}
