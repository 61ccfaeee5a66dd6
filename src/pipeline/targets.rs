//! Target list loading.
//!
//! A target file holds one target per line. Blank lines and lines starting
//! with `#` are skipped. A line without a scheme becomes `http://<line>`, and
//! also `https://<line>` when `prepend_https` is set.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info};

use crate::error::TargetError;
use crate::scheduler::Job;

/// Expands one raw line into its targets.
pub fn normalize_target(line: &str, prepend_https: bool) -> Vec<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Vec::new();
    }
    if line.contains("://") {
        return vec![line.to_string()];
    }

    let mut targets = vec![format!("http://{line}")];
    if prepend_https {
        targets.push(format!("https://{line}"));
    }
    targets
}

/// Parses target text, keeping the first occurrence of each target.
pub fn parse_targets(text: &str, prepend_https: bool) -> Vec<Job> {
    let raw = text
        .lines()
        .flat_map(|line| normalize_target(line, prepend_https))
        .map(Job::new);
    dedup_jobs(raw)
}

/// Loads targets from a file.
pub fn load_targets(path: &Path, prepend_https: bool) -> Result<Vec<Job>, TargetError> {
    let text = std::fs::read_to_string(path).map_err(|source| TargetError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let jobs = parse_targets(&text, prepend_https);
    if jobs.is_empty() {
        return Err(TargetError::Empty(path.to_path_buf()));
    }
    info!(path = %path.display(), targets = jobs.len(), "Loaded targets");
    Ok(jobs)
}

/// Drops repeated targets, preserving first-seen order.
pub fn dedup_jobs(jobs: impl IntoIterator<Item = Job>) -> Vec<Job> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut duplicates = 0usize;

    for job in jobs {
        if seen.insert(job.target().to_string()) {
            unique.push(job);
        } else {
            duplicates += 1;
        }
    }
    if duplicates > 0 {
        debug!(duplicates, "Dropped duplicate targets");
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_target() {
        assert_eq!(normalize_target("  ", false), Vec::<String>::new());
        assert_eq!(normalize_target("# comment", true), Vec::<String>::new());
        assert_eq!(
            normalize_target("https://a.example/login", true),
            vec!["https://a.example/login"]
        );
        assert_eq!(normalize_target("a.example", false), vec!["http://a.example"]);
        assert_eq!(
            normalize_target("a.example:8080", true),
            vec!["http://a.example:8080", "https://a.example:8080"]
        );
    }

    #[test]
    fn test_parse_targets_dedups() {
        let jobs = parse_targets("a.example\nhttp://a.example\n\n# skip\nb.example\n", false);
        let targets: Vec<&str> = jobs.iter().map(|j| j.target()).collect();
        assert_eq!(targets, vec!["http://a.example", "http://b.example"]);
    }

    #[test]
    fn test_load_targets_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.txt");
        std::fs::write(&path, "a.example\nb.example\n").unwrap();

        let jobs = load_targets(&path, true).unwrap();
        assert_eq!(jobs.len(), 4);
    }

    #[test]
    fn test_load_targets_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        assert!(matches!(
            load_targets(&missing, false),
            Err(TargetError::Read { .. })
        ));

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "# nothing\n\n").unwrap();
        assert!(matches!(load_targets(&empty, false), Err(TargetError::Empty(_))));
    }
}
