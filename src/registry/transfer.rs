//! Bringing source files under the repository root.
//!
//! Every transfer is recorded so a failed registration can be undone,
//! leaving both the source tree and the repository as they were.

use super::MoveMode;
use crate::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A completed transfer that can be reverted.
#[derive(Debug)]
pub struct Transfer {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub mode: MoveMode,
}

impl Transfer {
    /// Undo the transfer. For `Move` the file goes back to its source.
    pub fn revert(&self) -> io::Result<()> {
        match self.mode {
            MoveMode::Move => move_file(&self.destination, &self.source),
            MoveMode::Copy | MoveMode::Link => fs::remove_file(&self.destination),
        }
    }
}

/// Transfer one file. The destination must not exist.
pub fn transfer(source: &Path, destination: &Path, mode: MoveMode) -> Result<Transfer> {
    if fs::symlink_metadata(destination).is_ok() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination {} already exists", destination.display()),
        )));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    match mode {
        MoveMode::Move => move_file(source, destination)?,
        MoveMode::Copy => {
            fs::copy(source, destination)?;
        }
        MoveMode::Link => link_file(source, destination)?,
    }

    tracing::debug!(
        "{:?} {} -> {}",
        mode,
        source.display(),
        destination.display()
    );

    Ok(Transfer {
        source: source.to_path_buf(),
        destination: destination.to_path_buf(),
        mode,
    })
}

/// Revert transfers in reverse order, reporting every failure.
pub fn rollback(transfers: &[Transfer]) {
    for done in transfers.iter().rev() {
        if let Err(e) = done.revert() {
            tracing::error!(
                "failed to roll back {}: {}",
                done.destination.display(),
                e
            );
        }
    }
}

fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(source, destination)?;
            fs::remove_file(source)
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn link_file(source: &Path, destination: &Path) -> io::Result<()> {
    let target = fs::canonicalize(source)?;
    std::os::unix::fs::symlink(target, destination)
}

#[cfg(not(unix))]
fn link_file(source: &Path, destination: &Path) -> io::Result<()> {
    fs::hard_link(source, destination)
}
