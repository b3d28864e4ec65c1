//! Recent commits from `git log`.

/// Format passed to `git log`: short hash, subject and relative date
pub(crate) const LOG_FORMAT: &str = "--pretty=format:%h%x1f%s%x1f%cr";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub hash: String,
    pub subject: String,
    /// e.g. `3 days ago`
    pub relative_date: String,
}

pub fn parse_log(text: &str) -> Vec<LogEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, '\u{1f}');
            Some(LogEntry {
                hash: fields.next()?.to_string(),
                subject: fields.next()?.to_string(),
                relative_date: fields.next()?.to_string(),
            })
        })
        .collect()
}
