//! Per-repository command queue.
//!
//! ```text
//! Session::mutate / apply / select
//!        |  flume
//!        v
//!     worker ---- one command at a time ----> Repository (running token)
//!        |  supersede reads, run, refresh
//!        v
//!  watch::Sender<Arc<Snapshot>> ----> Session::subscribe
//!
//! Session::status / branches / ...  ----> Repository (read token)
//! ```
//!
//! Mutations and selection changes are serialized through the worker.
//! Reads run concurrently outside the queue; starting a mutation cancels
//! the reads in flight, which then fail with
//! [`GitDeckError::Superseded`].

use crate::GitDeckError;
use crate::branch::{Branches, Remote};
use crate::commit::CommitDraft;
use crate::config::GitSettings;
use crate::diff::Diff;
use crate::history::LogEntry;
use crate::outcome::Outcome;
use crate::parse::LineRef;
use crate::process::{ProcessRunner, SystemRunner};
use crate::repo::{Applied, Repository, Scope};
use crate::stash::StashEntry;
use crate::status::RepositoryStatus;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Status and both diffs as of one refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub status: RepositoryStatus,
    /// Index to working tree
    pub unstaged: Diff,
    /// HEAD to index
    pub staged: Diff,
    /// Incremented on every publish
    pub generation: u64,
}

impl Snapshot {
    pub fn diff(&self, scope: Scope) -> &Diff {
        match scope {
            Scope::Unstaged => &self.unstaged,
            Scope::Staged => &self.staged,
        }
    }

    fn diff_mut(&mut self, scope: Scope) -> &mut Diff {
        match scope {
            Scope::Unstaged => &mut self.unstaged,
            Scope::Staged => &mut self.staged,
        }
    }
}

/// Change to the hunk selection of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    /// Flip hunk `n` (0-based)
    Toggle(usize),
    Set(usize, bool),
    All,
    Clear,
}

/// Repository-changing operations run by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Stage(Vec<String>),
    Unstage(Vec<String>),
    Commit(String),
    CommitDraft(CommitDraft),
    Push,
    Pull,
    Fetch,
    Checkout(String),
    CreateBranch(String),
    Merge(String),
    AbortMerge,
    StashPush(Option<String>),
    StashApply(usize),
    StashDrop(usize),
    SetUserConfig {
        name: Option<String>,
        email: Option<String>,
    },
}

/// Success value of a [`Mutation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completed {
    Done,
    Applied(Applied),
    Committed { hash: String },
}

type Reply<T> = oneshot::Sender<Result<T, GitDeckError>>;

enum Command {
    Refresh {
        reply: Reply<Arc<Snapshot>>,
    },
    Select {
        scope: Scope,
        path: String,
        change: SelectionChange,
        reply: Reply<Arc<Snapshot>>,
    },
    Apply {
        scope: Scope,
        path: String,
        /// Line references; `None` applies the selected hunks
        lines: Option<Vec<LineRef>>,
        reply: Reply<Outcome<Applied>>,
    },
    Mutate {
        mutation: Mutation,
        reply: Reply<Outcome<Completed>>,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancellation epoch for reads outside the queue
#[derive(Debug)]
struct ReadGate {
    epoch: Mutex<CancellationToken>,
    shutdown: CancellationToken,
}

impl ReadGate {
    fn new(shutdown: CancellationToken) -> Self {
        Self {
            epoch: Mutex::new(shutdown.child_token()),
            shutdown,
        }
    }

    fn current(&self) -> CancellationToken {
        lock(&self.epoch).clone()
    }

    /// Cancel every read started so far
    fn supersede(&self) {
        let mut epoch = lock(&self.epoch);
        epoch.cancel();
        *epoch = self.shutdown.child_token();
    }
}

/// Handle to the worker of one repository
pub struct Session<R: ProcessRunner = SystemRunner> {
    repo: Repository<R>,
    commands: flume::Sender<Command>,
    snapshot: watch::Receiver<Arc<Snapshot>>,
    reads: Arc<ReadGate>,
    running: Arc<Mutex<Option<CancellationToken>>>,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl Session<SystemRunner> {
    /// Open the repository containing `path` and start its worker.
    pub async fn open(path: impl AsRef<Path>, git: GitSettings) -> Result<Self, GitDeckError> {
        Self::start(Repository::open(path, git).await?).await
    }
}

impl<R: ProcessRunner> Session<R> {
    /// Take the first snapshot of `repo` and start the worker.
    pub async fn start(repo: Repository<R>) -> Result<Self, GitDeckError> {
        let shutdown = CancellationToken::new();
        let repo = repo.with_cancellation(shutdown.child_token());
        let first = load_snapshot(&repo, None).await?;
        let (publisher, snapshot) = watch::channel(Arc::new(first));
        let (commands, queue) = flume::unbounded();
        let reads = Arc::new(ReadGate::new(shutdown.clone()));
        let running = Arc::new(Mutex::new(None));

        let worker = Worker {
            repo: repo.clone(),
            publisher,
            reads: Arc::clone(&reads),
            running: Arc::clone(&running),
            shutdown: shutdown.clone(),
        };
        let worker = tokio::spawn(worker.run(queue));
        info!(root = %repo.root().display(), "session started");

        Ok(Self {
            repo,
            commands,
            snapshot,
            reads,
            running,
            shutdown,
            worker,
        })
    }

    pub fn repository(&self) -> &Repository<R> {
        &self.repo
    }

    /// The latest published snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Receiver notified on every new snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.clone()
    }

    async fn send<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, GitDeckError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send_async(command(reply))
            .await
            .map_err(|_| GitDeckError::SessionClosed)?;
        answer.await.map_err(|_| GitDeckError::SessionClosed)?
    }

    /// Re-read status and both diffs.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, GitDeckError> {
        self.send(|reply| Command::Refresh { reply }).await
    }

    /// Change the hunk selection of `path` in the `scope` diff.
    pub async fn select(
        &self,
        scope: Scope,
        path: &str,
        change: SelectionChange,
    ) -> Result<Arc<Snapshot>, GitDeckError> {
        let path = path.to_string();
        self.send(|reply| Command::Select {
            scope,
            path,
            change,
            reply,
        })
        .await
    }

    /// Stage (or unstage) the selected hunks of `path`.
    pub async fn apply(&self, scope: Scope, path: &str) -> Result<Outcome<Applied>, GitDeckError> {
        let path = path.to_string();
        self.send(|reply| Command::Apply {
            scope,
            path,
            lines: None,
            reply,
        })
        .await
    }

    /// Stage (or unstage) individual changed lines of `path`.
    pub async fn apply_lines(
        &self,
        scope: Scope,
        path: &str,
        refs: Vec<LineRef>,
    ) -> Result<Outcome<Applied>, GitDeckError> {
        let path = path.to_string();
        self.send(|reply| Command::Apply {
            scope,
            path,
            lines: Some(refs),
            reply,
        })
        .await
    }

    pub async fn mutate(&self, mutation: Mutation) -> Result<Outcome<Completed>, GitDeckError> {
        self.send(|reply| Command::Mutate { mutation, reply }).await
    }

    /// Kill the mutation currently running, if any.
    ///
    /// Its result becomes [`crate::Failure::Cancelled`].
    pub fn cancel_running(&self) -> bool {
        match lock(&self.running).as_ref() {
            Some(token) => {
                info!("cancelling running operation");
                token.cancel();
                true
            }
            None => false,
        }
    }

    // --- reads outside the queue ---

    fn reader(&self) -> Repository<R> {
        self.repo.with_cancellation(self.reads.current())
    }

    pub async fn status(&self) -> Result<RepositoryStatus, GitDeckError> {
        self.reader().status().await
    }

    pub async fn history(&self, count: usize) -> Result<Vec<LogEntry>, GitDeckError> {
        self.reader().recent_history(count).await
    }

    pub async fn branches(&self) -> Result<Branches, GitDeckError> {
        self.reader().branches().await
    }

    pub async fn stashes(&self) -> Result<Vec<StashEntry>, GitDeckError> {
        self.reader().stashes().await
    }

    pub async fn remotes(&self) -> Result<Vec<Remote>, GitDeckError> {
        self.reader().remotes().await
    }

    pub async fn conflicted_paths(&self) -> Result<Vec<String>, GitDeckError> {
        self.reader().conflicted_paths().await
    }

    pub async fn merge_message(&self) -> Result<Option<String>, GitDeckError> {
        self.reader().merge_message().await
    }

    pub async fn staged_diff_text(&self) -> Result<String, GitDeckError> {
        self.reader().staged_diff_text().await
    }

    pub async fn user_identity(&self) -> Result<(Option<String>, Option<String>), GitDeckError> {
        self.reader().user_identity().await
    }

    /// Finish queued commands and stop the worker.
    pub async fn close(self) {
        let Session {
            commands, worker, ..
        } = self;
        drop(commands);
        if let Err(e) = worker.await {
            warn!(error = %e, "session worker ended abnormally");
        }
    }

    /// Stop immediately, killing whatever git command is running.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.close().await;
    }
}

struct Worker<R: ProcessRunner> {
    repo: Repository<R>,
    publisher: watch::Sender<Arc<Snapshot>>,
    reads: Arc<ReadGate>,
    running: Arc<Mutex<Option<CancellationToken>>>,
    shutdown: CancellationToken,
}

impl<R: ProcessRunner> Worker<R> {
    async fn run(self, queue: flume::Receiver<Command>) {
        while let Ok(command) = queue.recv_async().await {
            match command {
                Command::Refresh { reply } => {
                    let result = self.refresh().await;
                    let _ = reply.send(result);
                }
                Command::Select {
                    scope,
                    path,
                    change,
                    reply,
                } => {
                    let _ = reply.send(self.select(scope, &path, change));
                }
                Command::Apply {
                    scope,
                    path,
                    lines,
                    reply,
                } => {
                    let result = self.apply(scope, &path, lines).await;
                    let _ = reply.send(result);
                }
                Command::Mutate { mutation, reply } => {
                    let repo = self.begin();
                    debug!(?mutation, "running");
                    let result = execute(&repo, mutation).await;
                    self.finish().await;
                    let _ = reply.send(result);
                }
            }
        }
        debug!("session worker stopped");
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.publisher.borrow())
    }

    fn publish(&self, mut snapshot: Snapshot) -> Arc<Snapshot> {
        snapshot.generation = self.current().generation + 1;
        let snapshot = Arc::new(snapshot);
        debug!(generation = snapshot.generation, "publishing snapshot");
        self.publisher.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    async fn refresh(&self) -> Result<Arc<Snapshot>, GitDeckError> {
        let previous = self.current();
        let snapshot = load_snapshot(&self.repo, Some(&previous)).await?;
        Ok(self.publish(snapshot))
    }

    fn select(
        &self,
        scope: Scope,
        path: &str,
        change: SelectionChange,
    ) -> Result<Arc<Snapshot>, GitDeckError> {
        let mut snapshot = Snapshot::clone(&self.current());
        let file = snapshot
            .diff_mut(scope)
            .file_mut(path)
            .ok_or_else(|| GitDeckError::UnknownFile {
                path: path.to_string(),
            })?;
        match change {
            SelectionChange::Toggle(index) => {
                file.toggle(index)?;
            }
            SelectionChange::Set(index, selected) => file.select(index, selected)?,
            SelectionChange::All => file.select_all(),
            SelectionChange::Clear => file.clear_selection(),
        }
        Ok(self.publish(snapshot))
    }

    async fn apply(
        &self,
        scope: Scope,
        path: &str,
        lines: Option<Vec<LineRef>>,
    ) -> Result<Outcome<Applied>, GitDeckError> {
        let snapshot = self.current();
        let file = snapshot
            .diff(scope)
            .file(path)
            .ok_or_else(|| GitDeckError::UnknownFile {
                path: path.to_string(),
            })?;
        if lines.is_none() && file.selected_indices().is_empty() {
            return Ok(Outcome::Success(Applied::NothingSelected));
        }

        let repo = self.begin();
        let result = match &lines {
            Some(refs) => repo.apply_lines(scope, file, refs).await,
            None => repo.apply_selection(scope, file).await,
        };
        self.finish().await;
        result
    }

    /// Cancel reads in flight and hand out a repository for one mutation.
    fn begin(&self) -> Repository<R> {
        self.reads.supersede();
        let token = self.shutdown.child_token();
        *lock(&self.running) = Some(token.clone());
        self.repo.with_cancellation(token)
    }

    async fn finish(&self) {
        lock(&self.running).take();
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "refresh after mutation failed; keeping previous snapshot");
        }
    }
}

async fn execute<R: ProcessRunner>(
    repo: &Repository<R>,
    mutation: Mutation,
) -> Result<Outcome<Completed>, GitDeckError> {
    let done = |outcome: Outcome<()>| outcome.map(|()| Completed::Done);
    let committed = |outcome: Outcome<String>| outcome.map(|hash| Completed::Committed { hash });
    Ok(match mutation {
        Mutation::Stage(paths) => repo.stage_paths(&paths).await?.map(Completed::Applied),
        Mutation::Unstage(paths) => repo.unstage_paths(&paths).await?.map(Completed::Applied),
        Mutation::Commit(message) => committed(repo.commit(&message).await?),
        Mutation::CommitDraft(draft) => committed(repo.commit_draft(&draft).await?),
        Mutation::Push => done(repo.push().await?),
        Mutation::Pull => done(repo.pull().await?),
        Mutation::Fetch => done(repo.fetch().await?),
        Mutation::Checkout(name) => done(repo.checkout(&name).await?),
        Mutation::CreateBranch(name) => done(repo.create_branch(&name).await?),
        Mutation::Merge(name) => done(repo.merge(&name).await?),
        Mutation::AbortMerge => done(repo.abort_merge().await?),
        Mutation::StashPush(message) => done(repo.stash_push(message.as_deref()).await?),
        Mutation::StashApply(index) => done(repo.stash_apply(index).await?),
        Mutation::StashDrop(index) => done(repo.stash_drop(index).await?),
        Mutation::SetUserConfig { name, email } => done(
            repo.set_user_config(name.as_deref(), email.as_deref())
                .await?,
        ),
    })
}

/// Read status and both diffs. Hunk selections of files whose diff did
/// not change are carried over from `previous`.
async fn load_snapshot<R: ProcessRunner>(
    repo: &Repository<R>,
    previous: Option<&Snapshot>,
) -> Result<Snapshot, GitDeckError> {
    let (status, mut unstaged, mut staged) = tokio::try_join!(
        repo.status(),
        repo.diff(Scope::Unstaged, &[]),
        repo.diff(Scope::Staged, &[]),
    )?;
    if let Some(previous) = previous {
        keep_selections(&mut unstaged, &previous.unstaged);
        keep_selections(&mut staged, &previous.staged);
    }
    Ok(Snapshot {
        status,
        unstaged,
        staged,
        generation: previous.map_or(0, |p| p.generation),
    })
}

fn keep_selections(fresh: &mut Diff, previous: &Diff) {
    for file in &mut fresh.files {
        if let Some(old) = previous.file(&file.path)
            && old.same_changes(file)
        {
            for (hunk, old_hunk) in file.hunks.iter_mut().zip(&old.hunks) {
                hunk.selected = old_hunk.selected;
            }
        }
    }
}
