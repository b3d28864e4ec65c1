//! Stash entries from `git stash list`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Format passed to `git stash list`: reflog selector, commit time and
/// subject separated by unit separators
pub(crate) const STASH_FORMAT: &str = "--format=%gd%x1f%ct%x1f%gs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashEntry {
    pub index: usize,
    /// `stash@{n}`
    pub reference: String,
    /// e.g. `On main: half-done refactor` or `WIP on main: 1a2b3c4 subject`
    pub description: String,
    pub timestamp: SystemTime,
}

impl StashEntry {
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(3, '\u{1f}');
        let reference = fields.next()?;
        let seconds: u64 = fields.next()?.trim().parse().ok()?;
        let description = fields.next().unwrap_or_default();
        let index = reference
            .strip_prefix("stash@{")?
            .strip_suffix('}')?
            .parse()
            .ok()?;
        Some(StashEntry {
            index,
            reference: reference.to_string(),
            description: description.to_string(),
            timestamp: UNIX_EPOCH + Duration::from_secs(seconds),
        })
    }
}

/// Parse `git stash list` output; lines in any other shape are skipped.
pub fn parse_stash_list(text: &str) -> Vec<StashEntry> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(StashEntry::parse)
        .collect()
}
