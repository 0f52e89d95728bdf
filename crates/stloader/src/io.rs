//! src/io.rs
//!
//! Positioned reads on independent file handles.
//!
//! Every worker opens its own handle so that no two threads share a file
//! cursor. Reads are positioned (`pread` on Unix, `seek_read` on Windows),
//! and a read that returns fewer bytes than requested is an error.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;

/// A read-only handle owned by exactly one worker thread.
pub(crate) struct RangeReader {
    file: File,
    path_display: String,
}

impl RangeReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;
        Ok(Self {
            file,
            path_display: path.display().to_string(),
        })
    }

    /// Fills `buf` with the bytes at absolute file position `position`.
    pub(crate) fn read_exact_at(&self, buf: &mut [u8], position: u64) -> Result<()> {
        read_exact_at(&self.file, buf, position).with_context(|| {
            format!(
                "Short read of {} bytes at offset {} in {}",
                buf.len(),
                position,
                self.path_display
            )
        })
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], position: u64) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, position)?;
    Ok(())
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut position: u64) -> Result<()> {
    use std::io::ErrorKind;
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        match file.seek_read(buf, position) {
            Ok(0) => anyhow::bail!("unexpected end of file"),
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                position += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn read_exact_at(_file: &File, _buf: &mut [u8], _position: u64) -> Result<()> {
    anyhow::bail!("positioned reads are not supported on this platform")
}
