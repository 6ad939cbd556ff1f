//! Source preprocessing ("smash"): comment and blank-line stripping.
//!
//! Qualifying files are rewritten into a scratch copy before transfer so
//! less traffic crosses the serial link; the original file is never
//! touched. Only `.py` sources are smashed — everything else is copied to
//! the scratch location verbatim.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::job::SmashPolicy;

/// Comment marker in device source files.
const COMMENT_MARKER: char = '#';

/// Prefix for scratch copies, making leftovers recognizable.
const SCRATCH_PREFIX: &str = "smash_";

/// Whether a file qualifies for smashing under the policy.
pub fn should_smash(path: &Path, policy: SmashPolicy) -> bool {
    policy != SmashPolicy::Off
        && path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("py"))
            .unwrap_or(false)
}

/// Produce the transfer copy of `input` inside `scratch_dir`.
///
/// Smashes qualifying files per the policy; copies everything else
/// verbatim. Returns the path of the copy to transfer.
pub fn prepare_file(input: &Path, scratch_dir: &Path, policy: SmashPolicy) -> io::Result<PathBuf> {
    let name = input
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;
    let mut scratch_name = std::ffi::OsString::from(SCRATCH_PREFIX);
    scratch_name.push(name);
    let output = scratch_dir.join(scratch_name);

    if should_smash(input, policy) {
        smash_file(input, &output, policy)?;
        debug!("smashed {}", input.display());
    } else {
        fs::copy(input, &output)?;
    }
    Ok(output)
}

/// Rewrite `input` to `output` with blank lines and comments stripped
/// according to the policy level.
pub fn smash_file(input: &Path, output: &Path, policy: SmashPolicy) -> io::Result<()> {
    let source = fs::read_to_string(input)?;
    let mut writer = BufWriter::new(File::create(output)?);

    for line in source.lines() {
        let stripped = line.trim();

        // Blank lines are collapsed at every level.
        if stripped.is_empty() {
            continue;
        }

        // Full-comment lines go at CommentLines and above.
        if stripped.starts_with(COMMENT_MARKER) && policy >= SmashPolicy::CommentLines {
            continue;
        }

        // Trailing inline comments go at InlineComments. Only a marker
        // preceded by whitespace counts as a comment start, so markers
        // embedded in string literals survive and a second pass over
        // already-smashed output changes nothing.
        if policy >= SmashPolicy::InlineComments {
            if let Some(idx) = find_trailing_comment(line) {
                writeln!(writer, "{}", line[..idx].trim_end())?;
                continue;
            }
        }
        writeln!(writer, "{}", line.trim_end())?;
    }

    writer.flush()
}

/// Byte offset of the first whitespace-preceded comment marker, if any.
fn find_trailing_comment(line: &str) -> Option<usize> {
    let mut prev_was_space = false;
    for (idx, ch) in line.char_indices() {
        if ch == COMMENT_MARKER && prev_was_space {
            return Some(idx);
        }
        prev_was_space = ch.is_whitespace();
    }
    None
}
