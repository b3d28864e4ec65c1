//! Branches and remotes.

/// Format passed to `git for-each-ref`
pub(crate) const REF_FORMAT: &str = "--format=%(refname)";

const FORBIDDEN_SEQUENCES: [&str; 4] = ["..", ".lock", "@{", "\\"];
const FORBIDDEN_CHARS: [char; 6] = ['~', '^', ':', '?', '*', '['];
const MAX_BRANCH_NAME: usize = 100;

/// Check a new branch name, returning why it is rejected.
pub fn validate_branch_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("the name is empty".to_string());
    }
    if name.chars().count() > MAX_BRANCH_NAME {
        return Err(format!("the name is longer than {MAX_BRANCH_NAME} characters"));
    }
    if let Some(sequence) = FORBIDDEN_SEQUENCES.iter().find(|s| name.contains(*s)) {
        return Err(format!("it contains '{sequence}'"));
    }
    if name.starts_with('-') {
        return Err("it starts with '-'".to_string());
    }
    if name.ends_with('.') {
        return Err("it ends with '.'".to_string());
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("it contains whitespace or control characters".to_string());
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(format!("it contains '{c}'"));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Branches {
    pub local: Vec<String>,
    /// Remote-tracking branches such as `origin/main`
    pub remote: Vec<String>,
    pub current: Option<String>,
}

impl Branches {
    /// Build from `for-each-ref refs/heads refs/remotes` output and the
    /// current branch. Symbolic `*/HEAD` refs are skipped.
    pub fn parse(refs: &str, current: Option<String>) -> Self {
        let mut branches = Branches {
            current,
            ..Branches::default()
        };
        for line in refs.lines().map(str::trim) {
            if let Some(name) = line.strip_prefix("refs/heads/") {
                branches.local.push(name.to_string());
            } else if let Some(name) = line.strip_prefix("refs/remotes/")
                && !name.ends_with("/HEAD")
            {
                branches.remote.push(name.to_string());
            }
        }
        branches
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.local.iter().any(|b| b == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub fetch_url: Option<String>,
    pub push_url: Option<String>,
}

/// Parse `git remote -v` output
pub fn parse_remotes(text: &str) -> Vec<Remote> {
    let mut remotes: Vec<Remote> = Vec::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(url), Some(kind)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let index = match remotes.iter().position(|r| r.name == name) {
            Some(index) => index,
            None => {
                remotes.push(Remote {
                    name: name.to_string(),
                    fetch_url: None,
                    push_url: None,
                });
                remotes.len() - 1
            }
        };
        match kind {
            "(fetch)" => remotes[index].fetch_url = Some(url.to_string()),
            "(push)" => remotes[index].push_url = Some(url.to_string()),
            _ => {}
        }
    }
    remotes
}
