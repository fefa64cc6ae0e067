//! Writing an engine export stream to a tar archive

use crate::utils::errors::SyncError;
use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;

const BUFFER_SIZE: usize = 64 * 1024;

/// Copies an export stream into an output and always drains the stream.
///
/// A write failure stops writing but not reading: the rest of the export is
/// read and discarded so the engine can report any trailing error. Read
/// errors are export failures; write errors are archive failures.
pub struct ArchiveWriter<W: Write> {
    out: W,
    path: PathBuf,
}

impl<W: Write> ArchiveWriter<W> {
    /// `path` names the destination in error messages
    pub fn new(out: W, path: impl Into<PathBuf>) -> Self {
        Self {
            out,
            path: path.into(),
        }
    }

    /// Copy `export` until end of stream, returning the bytes written
    pub fn write_from<R: Read + ?Sized>(&mut self, export: &mut R) -> Result<u64, SyncError> {
        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut written: u64 = 0;
        let mut write_error: Option<io::Error> = None;

        loop {
            let n = match export.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    // The copy error came first and is the one returned
                    if let Some(write_error) = write_error {
                        crate::log_warn!("Export stream also failed: {}", source);
                        return Err(self.write_failed(write_error));
                    }
                    return Err(SyncError::StreamDrain { source });
                }
            };

            if write_error.is_none() {
                match self.out.write_all(&buf[..n]) {
                    Ok(()) => written += n as u64,
                    Err(e) => {
                        crate::log_warn!(
                            "Writing {} failed, draining the export stream",
                            self.path.display()
                        );
                        write_error = Some(e);
                    }
                }
            }
        }

        if let Some(source) = write_error {
            return Err(self.write_failed(source));
        }

        self.out
            .flush()
            .map_err(|source| self.write_failed(source))?;

        Ok(written)
    }

    fn write_failed(&self, source: io::Error) -> SyncError {
        SyncError::ArchiveWrite {
            path: self.path.clone(),
            source,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
