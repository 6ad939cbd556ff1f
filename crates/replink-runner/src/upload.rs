//! The file-transfer protocol: mirror a local tree onto the device.
//!
//! The uploader drives a connected polling-mode channel through an
//! open/write-chunks/close command sequence per file, with idempotent
//! directory creation ahead of each file. Everything is strictly
//! sequential: no chunk is sent before the previous command's settle delay
//! and drain have completed, which is what makes the protocol self-
//! throttling without any acknowledgement parsing.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use replink_channel::{Channel, ChannelError};
use replink_protocol::{Command, FILE_CHUNK_SIZE};

use crate::job::{TransferJob, TransferStats};
use crate::smash::prepare_file;

/// Errors that abort an upload run.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The configured source directory does not exist.
    #[error("source directory not found: {0}")]
    MissingSource(PathBuf),

    /// The channel failed; the remaining walk is abandoned.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Walking the source tree failed.
    #[error("cannot walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    /// Setting up the scratch directory failed.
    #[error("cannot create scratch directory: {0}")]
    Scratch(#[source] io::Error),
}

/// Outcome of one upload run.
#[derive(Debug, Default)]
pub struct UploadReport {
    /// Counters for the run.
    pub stats: TransferStats,
    /// Files that failed to preprocess, with the reason. These do not stop
    /// the walk; they mark the run as failed.
    pub failed_files: Vec<(PathBuf, String)>,
}

impl UploadReport {
    /// Whether every admitted file was transferred.
    pub fn is_success(&self) -> bool {
        self.failed_files.is_empty()
    }
}

/// Run a transfer job over a connected polling-mode channel.
///
/// On return — success or failure — the scratch copies are gone and the
/// channel has been disconnected.
pub fn run(job: &TransferJob, channel: &mut Channel) -> Result<UploadReport, UploadError> {
    validate(job)?;

    let scratch = match &job.scratch_dir {
        Some(dir) => tempfile::Builder::new()
            .prefix("replink")
            .tempdir_in(dir)
            .map_err(UploadError::Scratch)?,
        None => tempfile::Builder::new()
            .prefix("replink")
            .tempdir()
            .map_err(UploadError::Scratch)?,
    };

    let mut uploader = Uploader {
        job,
        channel,
        scratch_dir: scratch.path().to_path_buf(),
        stats: TransferStats::default(),
        created_dirs: HashSet::new(),
        failed_files: Vec::new(),
    };
    let result = uploader.run_walk();
    let report = UploadReport {
        stats: uploader.stats,
        failed_files: uploader.failed_files,
    };

    // Teardown is unconditional and best-effort: the channel never raises
    // from disconnect, and the scratch directory is removed on drop.
    channel.disconnect();
    if let Err(e) = scratch.close() {
        warn!("could not remove scratch directory: {}", e);
    }

    match result {
        Ok(()) => {
            info!(
                "upload complete: {} files, {} directories, {} bytes",
                report.stats.files_uploaded, report.stats.dirs_created, report.stats.bytes_sent
            );
            Ok(report)
        }
        Err(e) => Err(e),
    }
}

/// Fail fast on configuration problems, before any device I/O.
pub fn validate(job: &TransferJob) -> Result<(), UploadError> {
    if !job.source_root.is_dir() {
        return Err(UploadError::MissingSource(job.source_root.clone()));
    }
    Ok(())
}

struct Uploader<'a> {
    job: &'a TransferJob,
    channel: &'a mut Channel,
    scratch_dir: PathBuf,
    stats: TransferStats,
    /// Remote directories already created this run.
    created_dirs: HashSet<String>,
    failed_files: Vec<(PathBuf, String)>,
}

impl Uploader<'_> {
    fn run_walk(&mut self) -> Result<(), UploadError> {
        // The mkdir expressions need `os` on the device.
        self.issue(&Command::Import { module: "os".to_string() })?;

        let job = self.job;
        let walker = WalkDir::new(&job.source_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || job.admits_dir(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let basename = entry.file_name().to_string_lossy().to_string();
            if !self.job.admits_file(&basename) {
                debug!("skipping {}", entry.path().display());
                continue;
            }

            let Ok(rel) = entry.path().strip_prefix(&self.job.source_root) else {
                warn!("entry {} escapes the source root", entry.path().display());
                continue;
            };
            let remote_path = to_remote_path(rel);

            if let Some(parent) = rel.parent().filter(|p| !p.as_os_str().is_empty()) {
                self.ensure_remote_dirs(parent)?;
            }
            self.upload_file(entry.path(), &remote_path)?;
        }
        Ok(())
    }

    /// Create every missing ancestor of `parent` on the device, top-down,
    /// at most once per run.
    fn ensure_remote_dirs(&mut self, parent: &Path) -> Result<(), UploadError> {
        let mut chain: Vec<String> = Vec::new();
        for component in parent.components() {
            let name = component.as_os_str().to_string_lossy().to_string();
            let remote = if chain.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", chain.join("/"), name)
            };

            if self.created_dirs.insert(remote.clone()) {
                debug!("creating remote directory {}", remote);
                self.issue(&Command::MakeDirIfAbsent {
                    parent: if chain.is_empty() { None } else { Some(chain.join("/")) },
                    name: name.clone(),
                })?;
                self.stats.dirs_created += 1;
            }
            chain.push(name);
        }
        Ok(())
    }

    /// Transfer one file: open, stream chunks, close.
    ///
    /// A preprocessing failure abandons this file only. Once the remote
    /// handle is open, a close is always attempted — even when a chunk
    /// write fails and the run is about to abort.
    fn upload_file(&mut self, local: &Path, remote: &str) -> Result<(), UploadError> {
        info!("uploading {}", remote);

        if self.job.dry_run {
            info!("dry run: would upload {} to {}", local.display(), remote);
            return Ok(());
        }

        let data = match prepare_file(local, &self.scratch_dir, self.job.smash)
            .and_then(|prepared| fs::read(&prepared))
        {
            Ok(data) => data,
            Err(e) => {
                warn!("cannot prepare {}: {}", local.display(), e);
                self.failed_files.push((local.to_path_buf(), e.to_string()));
                return Ok(());
            }
        };

        self.issue(&Command::OpenBinaryWrite { path: remote.to_string() })?;

        let mut chunk_error = None;
        for chunk in data.chunks(FILE_CHUNK_SIZE) {
            if let Err(e) = self.issue(&Command::WriteChunk { data: chunk.to_vec() }) {
                chunk_error = Some(e);
                break;
            }
            self.stats.bytes_sent += chunk.len() as u64;
        }

        let close_result = self.issue(&Command::CloseFile);
        if let Some(e) = chunk_error {
            return Err(e);
        }
        close_result?;

        self.stats.files_uploaded += 1;
        debug!("finished {} ({} bytes)", remote, data.len());
        Ok(())
    }

    /// Send one command through the synchronous send+drain cycle.
    fn issue(&mut self, command: &Command) -> Result<(), UploadError> {
        if self.job.dry_run {
            info!("dry run: would send {}", command.to_expr());
            return Ok(());
        }
        let reply = self.channel.exchange(command, self.job.command_wait)?;
        for line in reply {
            if !line.trim().is_empty() {
                debug!(">> {}", line);
            }
        }
        Ok(())
    }
}

/// Render a relative path with forward slashes for the device.
fn to_remote_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_remote_path_uses_forward_slashes() {
        let rel = Path::new("sub").join("deeper").join("b.py");
        assert_eq!(to_remote_path(&rel), "sub/deeper/b.py");
    }

    #[test]
    fn test_validate_missing_source() {
        let job = TransferJob::new("/definitely/not/a/dir");
        assert!(matches!(validate(&job), Err(UploadError::MissingSource(_))));
    }
}
