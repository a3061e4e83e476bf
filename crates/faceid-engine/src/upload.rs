//! Scoped staging of uploaded image payloads.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// An uploaded payload written to disk. The file is removed when the guard
/// drops unless [`persist`](Self::persist) was called.
pub(crate) struct StagedUpload {
    file: NamedTempFile,
}

impl StagedUpload {
    /// Create `dir/file_name` exclusively and write `bytes` into it. An
    /// existing file of that name is an `AlreadyExists` error, never overwritten.
    pub(crate) fn write(dir: &Path, file_name: &str, bytes: &[u8]) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        // A failed write drops the temp file, which removes the partial file.
        let mut file = tempfile::Builder::new()
            .prefix(file_name)
            .rand_bytes(0)
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        tracing::debug!(path = %file.path().display(), size = bytes.len(), "upload staged");
        Ok(Self { file })
    }

    pub(crate) fn path(&self) -> &Path {
        self.file.path()
    }

    /// Keep the file on disk and hand back its path.
    pub(crate) fn persist(self) -> io::Result<PathBuf> {
        let (_, path) = self.file.keep()?;
        Ok(path)
    }
}
