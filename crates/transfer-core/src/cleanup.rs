//! Partial-Download Cleanup (C9): decide whether to keep or delete a
//! target file after a stream download terminates without success.
//!
//! The decision is a pure function of a stat result plus the download's
//! own bookkeeping so it can be unit tested without touching a filesystem.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Size tolerance (spec §4.9): gaps this small or smaller are treated as
/// "close enough", not a partial download.
const SIZE_TOLERANCE_BYTES: u64 = 512;

/// Why the download stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupReason {
    Cancelled,
    Error,
}

/// Everything [`decide`] needs, with the filesystem stat already resolved
/// by the caller (`actual_size: None` means the file was missing).
#[derive(Debug, Clone)]
pub struct CleanupContext {
    pub target_path: PathBuf,
    pub expected_size: Option<u64>,
    pub bytes_written: u64,
    pub actual_size: Option<u64>,
    pub reason: CleanupReason,
}

/// Result of the retain/delete decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// `stat` found nothing to clean up.
    Missing,
    /// File is kept, possibly because completeness can't be assessed.
    Retained { uncertain: bool },
    /// File was (or will be) unlinked.
    Deleted,
}

/// Pure retain/delete decision (spec §4.9). Does not touch the filesystem.
pub fn decide(ctx: &CleanupContext) -> CleanupOutcome {
    let Some(actual_size) = ctx.actual_size else {
        return CleanupOutcome::Missing;
    };

    let Some(expected_size) = ctx.expected_size else {
        return CleanupOutcome::Retained { uncertain: true };
    };

    let gap = expected_size.saturating_sub(actual_size);
    let written_gap = expected_size.saturating_sub(ctx.bytes_written);
    if gap <= SIZE_TOLERANCE_BYTES || written_gap <= SIZE_TOLERANCE_BYTES {
        return CleanupOutcome::Retained { uncertain: false };
    }

    CleanupOutcome::Deleted
}

/// Stat `target_path`, apply [`decide`], and unlink the file if the
/// decision is `Deleted`. `ENOENT` on unlink is treated as success (the
/// file is already gone, which is the desired end state).
pub async fn cleanup_after_interruption(
    target_path: &Path,
    expected_size: Option<u64>,
    bytes_written: u64,
    reason: CleanupReason,
) -> std::io::Result<CleanupOutcome> {
    let actual_size = match tokio::fs::metadata(target_path).await {
        Ok(meta) => Some(meta.len()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(err),
    };

    let ctx = CleanupContext {
        target_path: target_path.to_path_buf(),
        expected_size,
        bytes_written,
        actual_size,
        reason,
    };
    let outcome = decide(&ctx);

    if outcome == CleanupOutcome::Deleted {
        match tokio::fs::remove_file(target_path).await {
            Ok(()) => debug!(path = %target_path.display(), "removed partial download"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %target_path.display(), "failed to remove partial download: {err}");
                return Err(err);
            }
        }
    }

    Ok(outcome)
}
