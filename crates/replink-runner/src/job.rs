//! Transfer job configuration and statistics.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// How aggressively source files are stripped before transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SmashPolicy {
    /// Transfer files verbatim.
    Off,
    /// Drop blank lines.
    BlankLines,
    /// Also drop lines that are entirely a comment.
    CommentLines,
    /// Also strip trailing inline comments from code lines.
    InlineComments,
}

impl SmashPolicy {
    /// Map the CLI's numeric level (1-3) to a policy.
    pub fn from_level(level: u8) -> Option<SmashPolicy> {
        match level {
            1 => Some(SmashPolicy::BlankLines),
            2 => Some(SmashPolicy::CommentLines),
            3 => Some(SmashPolicy::InlineComments),
            _ => None,
        }
    }
}

/// Configuration for one run of the file-upload protocol.
#[derive(Debug, Clone)]
pub struct TransferJob {
    /// Local directory tree to mirror onto the device.
    pub source_root: PathBuf,
    /// Basenames excluded from the walk (files and directories).
    pub excludes: HashSet<String>,
    /// When non-empty, only files with these basenames are uploaded.
    pub includes: HashSet<String>,
    /// Preprocessing applied to qualifying files.
    pub smash: SmashPolicy,
    /// Where preprocessed scratch copies are written.
    pub scratch_dir: Option<PathBuf>,
    /// Log what would happen without touching the device.
    pub dry_run: bool,
    /// Settle delay passed to each command send.
    pub command_wait: Duration,
}

impl TransferJob {
    /// Create a job for a source tree with defaults matching the CLI's.
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        TransferJob {
            source_root: source_root.into(),
            excludes: HashSet::new(),
            includes: HashSet::new(),
            smash: SmashPolicy::CommentLines,
            scratch_dir: None,
            dry_run: false,
            command_wait: Duration::from_millis(50),
        }
    }

    /// Whether a basename survives the exclude/include rule.
    ///
    /// Excludes always win; a non-empty include set excludes every file
    /// not named in it.
    pub fn admits_file(&self, basename: &str) -> bool {
        if self.excludes.contains(basename) {
            return false;
        }
        self.includes.is_empty() || self.includes.contains(basename)
    }

    /// Whether a directory basename should be descended into.
    pub fn admits_dir(&self, basename: &str) -> bool {
        !self.excludes.contains(basename)
    }
}

/// Running counters for one transfer job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Files fully transferred.
    pub files_uploaded: u64,
    /// Remote directory-creation commands issued.
    pub dirs_created: u64,
    /// Bytes of file payload sent (smashed sizes, not originals).
    pub bytes_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smash_policy_from_level() {
        assert_eq!(SmashPolicy::from_level(1), Some(SmashPolicy::BlankLines));
        assert_eq!(SmashPolicy::from_level(2), Some(SmashPolicy::CommentLines));
        assert_eq!(SmashPolicy::from_level(3), Some(SmashPolicy::InlineComments));
        assert_eq!(SmashPolicy::from_level(0), None);
        assert_eq!(SmashPolicy::from_level(4), None);
    }

    #[test]
    fn test_include_set_overrides_everything_else() {
        let mut job = TransferJob::new("/tmp/src");
        job.includes.insert("b.py".to_string());
        assert!(job.admits_file("b.py"));
        assert!(!job.admits_file("a.py"));
    }

    #[test]
    fn test_excludes_win_over_includes() {
        let mut job = TransferJob::new("/tmp/src");
        job.includes.insert("a.py".to_string());
        job.excludes.insert("a.py".to_string());
        assert!(!job.admits_file("a.py"));
    }
}
