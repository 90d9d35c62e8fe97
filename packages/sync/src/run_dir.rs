//! Per-run output directories named `YYMMDD_HHMMSS`.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// `strftime` format of a run directory name.
pub const RUN_DIR_FORMAT: &str = "%y%m%d_%H%M%S";

const MAX_SUFFIX: u32 = 99;

/// Creates a fresh run directory under `base` for a run started at `now`.
///
/// The directory is created with `create_dir`, never reused: if a run in
/// the same second already claimed the name, `_01`, `_02`, ... are tried.
///
/// # Errors
///
/// Returns the I/O error if `base` cannot be created or every candidate
/// name is taken.
pub fn create_run_dir(base: &Path, now: DateTime<Local>) -> io::Result<PathBuf> {
    std::fs::create_dir_all(base)?;
    let stamp = now.format(RUN_DIR_FORMAT).to_string();

    let first = base.join(&stamp);
    match std::fs::create_dir(&first) {
        Ok(()) => return Ok(first),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }

    for n in 1..=MAX_SUFFIX {
        let candidate = base.join(format!("{stamp}_{n:02}"));
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("every run directory name for {stamp} is taken"),
    ))
}

/// Final path component of a run directory, used to name its log.
#[must_use]
pub fn run_stamp(run_dir: &Path) -> String {
    run_dir
        .file_name()
        .map_or_else(String::new, |name| name.to_string_lossy().into_owned())
}
