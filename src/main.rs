use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use gitdeck::diff::format_diff;
use gitdeck::parse::parse_target;
use gitdeck::status::Tracking;
use gitdeck::{
    CommitDraft, CommitType, GitDeckError, Outcome, Repository, Scope, Settings,
    config::SettingsLoader, logging,
};
use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "gitdeck", version)]
#[command(about = "Git front end with hunk and line level staging")]
struct Cli {
    /// Run as if started in DIR
    #[arg(short = 'C', value_name = "DIR", global = true, default_value = ".")]
    directory: PathBuf,

    /// Settings file layered over the user configuration
    #[arg(long, value_name = "FILE", global = true, env = "GITDECK_CONFIG")]
    config: Option<PathBuf>,

    /// More diagnostics on stderr (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Branch, upstream and changed paths
    Status,
    /// Changes with hunk indices and line numbers for selectors
    Diff {
        /// Show staged changes instead of unstaged ones
        #[arg(long)]
        cached: bool,
        files: Vec<String>,
    },
    /// Stage files, hunks or lines (e.g. "src/lib.rs", "src/lib.rs#1,3", "flake.nix:10..15,-20")
    Stage {
        #[arg(required = true)]
        targets: Vec<String>,
    },
    /// Unstage files, hunks or lines, using line numbers of `diff --cached`
    Unstage {
        #[arg(required = true)]
        targets: Vec<String>,
    },
    /// Commit the staged changes
    Commit(CommitArgs),
    /// Push the current branch to origin, setting the upstream on first push
    Push,
    /// Pull the current branch from its upstream
    Pull,
    Fetch,
    /// Switch to a branch
    Checkout {
        branch: String,
        /// Create the branch first
        #[arg(short = 'b')]
        create: bool,
    },
    /// Merge a branch into the current one
    Merge {
        #[arg(required_unless_present = "abort")]
        branch: Option<String>,
        /// Abort the merge in progress
        #[arg(long, conflicts_with = "branch")]
        abort: bool,
    },
    Stash {
        #[command(subcommand)]
        action: StashCommand,
    },
    /// Local and remote-tracking branches
    Branches,
    /// Recent commits
    Log {
        #[arg(short = 'n', long, default_value_t = 7)]
        count: usize,
    },
    /// Show or set user.name and user.email for this repository
    Identity {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Generate shell completions
    Completions { shell: Shell },
    /// Generate a man page
    Man,
}

#[derive(Args)]
struct CommitArgs {
    /// Complete message, used as-is
    #[arg(short, long, conflicts_with_all = ["kind", "scope", "subject"])]
    message: Option<String>,
    /// Conventional commit type (feat, fix, docs, style, refactor, test, chore)
    #[arg(long = "type", value_name = "TYPE")]
    kind: Option<CommitType>,
    #[arg(long)]
    scope: Option<String>,
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    body: Option<String>,
    #[arg(long)]
    footer: Option<String>,
    /// Mark as a breaking change
    #[arg(long)]
    breaking: bool,
}

#[derive(Subcommand)]
enum StashCommand {
    List,
    /// Stash local changes
    Push {
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Apply a stash, keeping it in the list
    Apply { index: usize },
    Drop { index: usize },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "gitdeck", &mut std::io::stdout());
            return ExitCode::SUCCESS;
        }
        Commands::Man => {
            return match clap_mangen::Man::new(Cli::command()).render(&mut std::io::stdout()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => fail(&e),
            };
        }
        _ => {}
    }

    let mut loader = SettingsLoader::new().with_user_file();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let settings = match loader.with_env_prefix("GITDECK").load() {
        Ok(settings) => settings,
        Err(e) => return fail(&e),
    };
    if let Err(e) = logging::init(&settings.log, cli.verbose) {
        return fail(&e);
    }

    match run(cli, settings).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %e, "command failed");
            fail(&e)
        }
    }
}

fn fail(error: &dyn Display) -> ExitCode {
    eprintln!("error: {error}");
    ExitCode::from(2)
}

/// Print the result of a mutation; `false` when git declined.
fn report<T>(outcome: &Outcome<T>, done: impl FnOnce(&T) -> String) -> bool {
    match outcome {
        Outcome::Success(value) => {
            println!("{}", done(value));
            true
        }
        other => {
            eprintln!("{other}");
            false
        }
    }
}

async fn run(cli: Cli, settings: Settings) -> Result<bool, GitDeckError> {
    let repo = Repository::open(&cli.directory, settings.git).await?;
    debug!(root = %repo.root().display(), "repository");

    match cli.command {
        Commands::Status => {
            print_status(&repo).await?;
            Ok(true)
        }
        Commands::Diff { cached, files } => {
            let scope = if cached { Scope::Staged } else { Scope::Unstaged };
            let diff = repo.diff(scope, &files).await?;
            if diff.is_empty() {
                println!("No {} changes", if cached { "staged" } else { "unstaged" });
            } else {
                print!("{}", format_diff(&diff));
            }
            Ok(true)
        }
        Commands::Stage { targets } => apply_targets(&repo, Scope::Unstaged, &targets).await,
        Commands::Unstage { targets } => apply_targets(&repo, Scope::Staged, &targets).await,
        Commands::Commit(args) => commit(&repo, args).await,
        Commands::Push => Ok(report(&repo.push().await?, |()| "Pushed".into())),
        Commands::Pull => Ok(report(&repo.pull().await?, |()| "Pulled".into())),
        Commands::Fetch => Ok(report(&repo.fetch().await?, |()| "Fetched".into())),
        Commands::Checkout { branch, create } => {
            let outcome = if create {
                repo.create_branch(&branch).await?
            } else {
                repo.checkout(&branch).await?
            };
            Ok(report(&outcome, |()| format!("Switched to {branch}")))
        }
        Commands::Merge { abort: true, .. } => {
            Ok(report(&repo.abort_merge().await?, |()| "Merge aborted".into()))
        }
        Commands::Merge { branch, .. } => {
            let branch = branch.unwrap_or_default();
            let outcome = repo.merge(&branch).await?;
            Ok(report(&outcome, |()| format!("Merged {branch}")))
        }
        Commands::Stash { action } => stash(&repo, action).await,
        Commands::Branches => {
            let branches = repo.branches().await?;
            for name in &branches.local {
                let mark = if branches.current.as_deref() == Some(name) { '*' } else { ' ' };
                println!("{mark} {name}");
            }
            for name in &branches.remote {
                println!("  remotes/{name}");
            }
            Ok(true)
        }
        Commands::Log { count } => {
            for entry in repo.recent_history(count).await? {
                println!("{} - {} ({})", entry.hash, entry.subject, entry.relative_date);
            }
            Ok(true)
        }
        Commands::Identity { name, email } => {
            if name.is_none() && email.is_none() {
                let (name, email) = repo.user_identity().await?;
                println!("user.name:  {}", name.as_deref().unwrap_or("(unset)"));
                println!("user.email: {}", email.as_deref().unwrap_or("(unset)"));
                return Ok(true);
            }
            let outcome = repo
                .set_user_config(name.as_deref(), email.as_deref())
                .await?;
            Ok(report(&outcome, |()| "Identity updated".into()))
        }
        Commands::Completions { .. } | Commands::Man => Ok(true),
    }
}

async fn print_status(repo: &Repository) -> Result<(), GitDeckError> {
    let status = repo.status().await?;
    match &status.branch {
        Some(branch) => println!("On branch {branch}"),
        None => println!("HEAD detached"),
    }
    if status.tracking() != Tracking::NoUpstream {
        println!("Branch is {}", status.tracking());
    }
    if repo.in_merge().await? {
        println!("Merge in progress");
    }
    if status.is_clean() {
        println!("Working tree clean");
    }
    for (title, paths) in [
        ("Conflicts", &status.conflicted),
        ("Staged", &status.staged),
        ("Unstaged", &status.unstaged),
        ("Untracked", &status.untracked),
    ] {
        if paths.is_empty() {
            continue;
        }
        println!("{title}:");
        for path in paths {
            match status.renamed_from.get(path) {
                Some(from) => println!("  {path} (from {from})"),
                None => println!("  {path}"),
            }
        }
    }
    Ok(())
}

async fn apply_targets(
    repo: &Repository,
    scope: Scope,
    targets: &[String],
) -> Result<bool, GitDeckError> {
    let verb = match scope {
        Scope::Unstaged => "Staged",
        Scope::Staged => "Unstaged",
    };
    let mut all_applied = true;
    for input in targets {
        let target = parse_target(input)?;
        let outcome = repo.apply_target(scope, &target).await?;
        all_applied &= report(&outcome, |applied| {
            format!("{verb} {applied} in {}", target.path)
        });
    }
    Ok(all_applied)
}

async fn commit(repo: &Repository, args: CommitArgs) -> Result<bool, GitDeckError> {
    let outcome = if let Some(message) = args.message {
        repo.commit(&message).await?
    } else {
        let mut draft = match (args.kind, repo.in_merge().await?) {
            (None, true) => {
                let prepared = repo.merge_message().await?.unwrap_or_default();
                CommitDraft::from_merge_message(&prepared)
            }
            (kind, _) => CommitDraft {
                kind,
                ..CommitDraft::default()
            },
        };
        if let Some(scope) = args.scope {
            draft.scope = scope;
        }
        if let Some(subject) = args.subject {
            draft.subject = subject;
        }
        if let Some(body) = args.body {
            draft.body = body;
        }
        if let Some(footer) = args.footer {
            draft.footer = footer;
        }
        draft.breaking |= args.breaking;
        repo.commit_draft(&draft).await?
    };
    Ok(report(&outcome, |hash| format!("Committed {hash}")))
}

async fn stash(repo: &Repository, action: StashCommand) -> Result<bool, GitDeckError> {
    match action {
        StashCommand::List => {
            let entries = repo.stashes().await?;
            if entries.is_empty() {
                println!("No stashes");
            }
            for entry in entries {
                println!("{}: {}", entry.reference, entry.description);
            }
            Ok(true)
        }
        StashCommand::Push { message } => {
            let outcome = repo.stash_push(message.as_deref()).await?;
            Ok(report(&outcome, |()| "Saved local changes".into()))
        }
        StashCommand::Apply { index } => {
            let outcome = repo.stash_apply(index).await?;
            Ok(report(&outcome, |()| format!("Applied stash@{{{index}}}")))
        }
        StashCommand::Drop { index } => {
            let outcome = repo.stash_drop(index).await?;
            Ok(report(&outcome, |()| format!("Dropped stash@{{{index}}}")))
        }
    }
}
