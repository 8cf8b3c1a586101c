//! CRC-32 naming of finished files.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::Crc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{GxsError, Result};
use crate::pipeline::PipelineEvent;

pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Streams a file through CRC-32 and renames it to carry the checksum.
#[derive(Debug, Clone)]
pub struct ChecksumFinalizer {
    block_size: usize,
    cancel: Arc<AtomicBool>,
}

impl ChecksumFinalizer {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// CRC-32 (IEEE) of the whole file, read one block at a time. Returns
    /// [`GxsError::Cancelled`] as soon as the cancel flag is seen.
    pub fn crc32_file(&self, path: &Path) -> Result<u32> {
        let mut file = File::open(path)?;
        let mut crc = Crc::new();
        let mut buf = vec![0u8; self.block_size];

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(GxsError::Cancelled);
            }
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            crc.update(&buf[..n]);
        }

        Ok(crc.sum())
    }

    /// Checksum `path` and rename it. Returns the new path.
    pub fn finalize(&self, path: &Path) -> Result<PathBuf> {
        if !path.exists() {
            return Err(GxsError::FileNotFound(path.display().to_string()));
        }

        let crc = self.crc32_file(path)?;
        self.rename_with_crc(path, crc)
    }

    /// Rename `path` to carry `crc`. A cancel seen here leaves the file
    /// untouched.
    pub fn rename_with_crc(&self, path: &Path, crc: u32) -> Result<PathBuf> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(GxsError::Cancelled);
        }
        let target = checksummed_path(path, crc);
        std::fs::rename(path, &target)?;
        info!("{} -> {}", path.display(), target.display());
        Ok(target)
    }
}

/// `<dir>/<stem>[<CRC>].<ext>` with the checksum as 8 uppercase hex digits.
pub fn checksummed_path(path: &Path, crc: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}[{:08X}].{}", stem, crc, ext.to_string_lossy()),
        None => format!("{}[{:08X}]", stem, crc),
    };
    path.with_file_name(name)
}

#[cfg_attr(test, mockall::automock)]
pub trait ChecksumRunner: Send {
    /// Start the checksum pass; the result arrives as
    /// [`PipelineEvent::ChecksumFinished`].
    fn start(&mut self, path: PathBuf);

    /// Stop the running pass at the next block boundary.
    fn cancel(&mut self);
}

/// Runs [`ChecksumFinalizer`] on the blocking pool.
pub struct BackgroundChecksum {
    events: mpsc::UnboundedSender<PipelineEvent>,
    block_size: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl BackgroundChecksum {
    pub fn new(events: mpsc::UnboundedSender<PipelineEvent>, block_size: usize) -> Self {
        Self {
            events,
            block_size,
            cancel: None,
        }
    }
}

impl ChecksumRunner for BackgroundChecksum {
    fn start(&mut self, path: PathBuf) {
        let finalizer = ChecksumFinalizer::new(self.block_size);
        self.cancel = Some(finalizer.cancel_flag());
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || {
            debug!("Checksumming {}", path.display());
            let result = finalizer.finalize(&path);
            let _ = events.send(PipelineEvent::ChecksumFinished(result));
        });
    }

    fn cancel(&mut self) {
        if let Some(flag) = self.cancel.take() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_crc_is_deterministic_across_block_sizes() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("A[Encoded].mkv");
        file.write_binary(b"123456789").unwrap();

        for block_size in [1, 4, DEFAULT_BLOCK_SIZE] {
            let crc = ChecksumFinalizer::new(block_size)
                .crc32_file(file.path())
                .unwrap();
            assert_eq!(crc, 0xCBF4_3926);
        }
    }

    #[test]
    fn test_finalize_renames_with_uppercase_hex() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("Show - 01[Encoded].mkv");
        file.write_binary(b"123456789").unwrap();

        let renamed = ChecksumFinalizer::new(DEFAULT_BLOCK_SIZE)
            .finalize(file.path())
            .unwrap();

        assert_eq!(
            renamed.file_name().unwrap().to_string_lossy(),
            "Show - 01[Encoded][CBF43926].mkv"
        );
        assert!(!file.path().exists());
        assert!(temp.child("Show - 01[Encoded][CBF43926].mkv").path().exists());
    }

    #[test]
    fn test_small_values_are_zero_padded() {
        let path = checksummed_path(Path::new("out/A[Encoded].mkv"), 0xAB);
        assert_eq!(path, Path::new("out/A[Encoded][000000AB].mkv"));
    }

    #[test]
    fn test_cancelled_pass_leaves_file_in_place() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("B[Encoded].mkv");
        file.write_binary(&[0u8; 1024]).unwrap();

        let finalizer = ChecksumFinalizer::new(16);
        finalizer.cancel_flag().store(true, Ordering::SeqCst);
        assert!(matches!(
            finalizer.finalize(file.path()),
            Err(GxsError::Cancelled)
        ));
        assert!(file.path().exists());
    }

    #[test]
    fn test_cancel_after_last_block_skips_rename() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("C[Encoded].mkv");
        file.write_binary(b"123456789").unwrap();

        let finalizer = ChecksumFinalizer::new(DEFAULT_BLOCK_SIZE);
        let crc = finalizer.crc32_file(file.path()).unwrap();
        finalizer.cancel_flag().store(true, Ordering::SeqCst);

        assert!(matches!(
            finalizer.rename_with_crc(file.path(), crc),
            Err(GxsError::Cancelled)
        ));
        assert!(file.path().exists());
        assert!(!temp.child("C[Encoded][CBF43926].mkv").path().exists());
    }

    #[tokio::test]
    async fn test_background_pass_reports_on_channel() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("C[Encoded].mkv");
        file.write_binary(b"123456789").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut runner = BackgroundChecksum::new(tx, DEFAULT_BLOCK_SIZE);
        runner.start(file.path().to_path_buf());

        match rx.recv().await {
            Some(PipelineEvent::ChecksumFinished(Ok(path))) => {
                assert!(path.to_string_lossy().ends_with("C[Encoded][CBF43926].mkv"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
