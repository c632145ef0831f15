use crate::camera::CameraError;
use chrono::Local;
use framebus::EncodedFrame;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Writes still captures as timestamped JPEG files into one directory.
#[derive(Debug, Clone)]
pub struct StillStore {
    dir: PathBuf,
}

impl StillStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, frame: &EncodedFrame) -> Result<PathBuf, CameraError> {
        if frame.is_empty() {
            return Err(CameraError::NoFrame);
        }

        fs::create_dir_all(&self.dir)?;

        let stem = Local::now().format("%Y-%m-%dT%H-%M-%S%.6f").to_string();
        // Two captures inside one timestamp tick get a numeric suffix.
        for attempt in 0..100u32 {
            let name = if attempt == 0 {
                format!("{stem}.jpg")
            } else {
                format!("{stem}-{attempt}.jpg")
            };
            let path = self.dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(frame.as_bytes())?;
                    file.sync_all()?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(CameraError::Capture(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free still name for {stem}"),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_writes_exact_bytes() {
        let dir = tempdir().unwrap();
        let store = StillStore::new(dir.path().join("images"));
        let frame = EncodedFrame::from(vec![0xFFu8, 0xD8, 0x00, 0xFF, 0xD9]);

        let path = store.save(&frame).unwrap();

        assert!(path.starts_with(dir.path().join("images")));
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(fs::read(&path).unwrap(), frame.as_bytes());
    }

    #[test]
    fn test_consecutive_saves_do_not_overwrite() {
        let dir = tempdir().unwrap();
        let store = StillStore::new(dir.path());
        let frame = EncodedFrame::from(vec![1u8, 2, 3]);

        let first = store.save(&frame).unwrap();
        let second = store.save(&frame).unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_save_without_frame_fails() {
        let dir = tempdir().unwrap();
        let store = StillStore::new(dir.path());
        assert!(matches!(
            store.save(&EncodedFrame::empty()),
            Err(CameraError::NoFrame)
        ));
    }

    #[test]
    fn test_unwritable_directory_is_capture_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();

        let store = StillStore::new(blocker.join("images"));
        assert!(matches!(
            store.save(&EncodedFrame::from(vec![1u8])),
            Err(CameraError::Capture(_))
        ));
    }
}
