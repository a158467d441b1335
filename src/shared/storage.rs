// This is free and unencumbered software released into the public domain.

//! Local JPEG storage, typically on a ramdisk served by a web server.

use crate::shared::DEFAULT_STORAGE_DIR;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Name of the file that always holds the name of the latest image.
pub const DATA_FILE: &str = "data.txt";

#[derive(Clone, Debug)]
pub struct LocalStorage {
    dir: PathBuf,
    data_file: PathBuf,
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_DIR)
    }
}

impl LocalStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let data_file = dir.join(DATA_FILE);
        Self { dir, data_file }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    /// Writes `jpeg` as `dir/filename`, then records `filename` in the data
    /// file.
    pub fn try_store(&self, filename: &str, jpeg: &[u8]) -> io::Result<PathBuf> {
        let path = self.dir.join(filename);
        fs::write(&path, jpeg)?;
        fs::write(&self.data_file, filename)?;
        Ok(path)
    }

    /// Like [`try_store`](Self::try_store), but failures are only logged.
    pub fn store(&self, filename: &str, jpeg: &[u8]) -> Option<PathBuf> {
        match self.try_store(filename, jpeg) {
            Ok(path) => Some(path),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                asimov_module::tracing::warn!(
                    target: "asimov_timelapse_module",
                    error = %_err,
                    dir = %self.dir.display(),
                    filename = %filename,
                    "failed to store image"
                );
                None
            },
        }
    }
}
