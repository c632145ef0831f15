//! Camera stand-in that replays recorded JPEGs (or a generated test card)
//! through the frame bus at a fixed rate, so the server can run without the
//! inference hardware attached.

use crate::camera::{
    CameraControl, CameraError, CameraSettings, Exposure, validate_lens_position,
};
use crate::render;
use crate::stills::StillStore;
use anyhow::Context;
use framebus::{DetectionBox, FrameBus, MAX_FRAME_BYTES};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const FRAME_PATTERNS: [&str; 3] = ["*.jpg", "*.jpeg", "*.JPG"];

/// One recorded frame and the detections stored next to it.
#[derive(Debug, Clone)]
pub struct ReplayFrame {
    pub name: String,
    pub jpeg: Vec<u8>,
    pub detections: Vec<DetectionBox>,
}

/// Load every JPEG in `dir` in file-name order. A `<stem>.json` sidecar holding
/// `[[x_min, y_min, x_max, y_max], ...]` supplies the frame's detections.
///
/// A missing directory yields no frames; unreadable files are errors. Frames
/// too large for the wire are skipped with a warning.
pub fn load_frames(dir: &Path) -> anyhow::Result<Vec<ReplayFrame>> {
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "Replay directory not found");
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for pattern in FRAME_PATTERNS {
        let pattern = dir.join(pattern);
        for entry in glob::glob(&pattern.to_string_lossy())? {
            paths.push(entry?);
        }
    }
    paths.sort();
    paths.dedup();

    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        let jpeg =
            fs::read(&path).with_context(|| format!("Failed to read frame {}", path.display()))?;
        if jpeg.len() > MAX_FRAME_BYTES {
            tracing::warn!(
                path = %path.display(),
                bytes = jpeg.len(),
                "Skipping frame larger than the wire limit"
            );
            continue;
        }
        let detections = load_sidecar(&path.with_extension("json"))?;
        frames.push(ReplayFrame {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            jpeg,
            detections,
        });
    }

    Ok(frames)
}

fn load_sidecar(path: &Path) -> anyhow::Result<Vec<DetectionBox>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read(path)
        .with_context(|| format!("Failed to read detections {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("Malformed detections {}", path.display()))
}

pub struct ReplayCamera {
    bus: Arc<FrameBus>,
    stills: StillStore,
    frames: Vec<ReplayFrame>,
    frame_size: (u16, u16),
    settings: Mutex<CameraSettings>,
}

impl ReplayCamera {
    pub fn new(
        frames: Vec<ReplayFrame>,
        frame_size: (u16, u16),
        bus: Arc<FrameBus>,
        stills: StillStore,
    ) -> Self {
        Self {
            bus,
            stills,
            frames,
            frame_size,
            settings: Mutex::new(CameraSettings::default()),
        }
    }

    pub fn load(
        dir: &Path,
        frame_size: (u16, u16),
        bus: Arc<FrameBus>,
        stills: StillStore,
    ) -> anyhow::Result<Self> {
        let frames = load_frames(dir)?;
        if frames.is_empty() {
            tracing::info!(
                width = frame_size.0,
                height = frame_size.1,
                "No recorded frames, replaying a generated test pattern"
            );
        } else {
            tracing::info!(
                frames = frames.len(),
                dir = %dir.display(),
                "Loaded recorded frames"
            );
        }
        Ok(Self::new(frames, frame_size, bus, stills))
    }

    pub fn settings(&self) -> CameraSettings {
        *self.lock_settings()
    }

    fn lock_settings(&self) -> MutexGuard<'_, CameraSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build and publish frame number `index`. Returns the bus sequence.
    pub fn publish_frame(&self, index: u64) -> anyhow::Result<u64> {
        let overlay = self.settings().overlay;

        let (jpeg, detections) = if self.frames.is_empty() {
            let (width, height) = self.frame_size;
            let phase = (index % u64::from(width.max(1))) as u32;
            (
                render::test_pattern(u32::from(width), u32::from(height), phase)?,
                Vec::new(),
            )
        } else {
            let frame = &self.frames[(index % self.frames.len() as u64) as usize];
            let jpeg = if overlay && !frame.detections.is_empty() {
                match render::draw_detections(&frame.jpeg, &frame.detections) {
                    Ok(drawn) => drawn,
                    Err(e) => {
                        tracing::warn!(frame = %frame.name, error = %e, "Overlay rendering failed");
                        frame.jpeg.clone()
                    }
                }
            } else {
                frame.jpeg.clone()
            };
            (jpeg, frame.detections.clone())
        };

        Ok(self.bus.publish(detections, jpeg)?)
    }

    /// Publish at `fps` until `shutdown` is raised.
    pub fn run(&self, fps: f64, shutdown: &AtomicBool) -> anyhow::Result<()> {
        let frame_duration = Duration::from_secs_f64(1.0 / fps.max(0.1));
        tracing::info!(fps, "Replay camera publishing");

        let mut frame_count = 0u64;
        let mut window_start = Instant::now();

        while !shutdown.load(Ordering::Relaxed) {
            let started = Instant::now();

            match self.publish_frame(frame_count) {
                Ok(sequence) => {
                    frame_count += 1;
                    if frame_count % 30 == 0 {
                        let elapsed = window_start.elapsed().as_secs_f64();
                        tracing::debug!(
                            sequence,
                            readers = self.bus.reader_count(),
                            fps = 30.0 / elapsed.max(f64::EPSILON),
                            "Replay status"
                        );
                        window_start = Instant::now();
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to publish frame - skipping");
                    frame_count += 1;
                }
            }

            std::thread::sleep(frame_duration.saturating_sub(started.elapsed()));
        }

        tracing::info!(frames = frame_count, "Replay camera stopped");
        Ok(())
    }
}

impl CameraControl for ReplayCamera {
    fn save_still(&self) -> Result<PathBuf, CameraError> {
        self.stills.save(self.bus.read().frame())
    }

    fn set_overlay(&self, enabled: bool) -> Result<(), CameraError> {
        self.lock_settings().overlay = enabled;
        tracing::info!(enabled, "Overlay toggled");
        Ok(())
    }

    fn set_exposure(&self, exposure: Option<Exposure>) -> Result<(), CameraError> {
        if let Some(exposure) = exposure {
            exposure.validate()?;
        }
        self.lock_settings().exposure = exposure;
        tracing::info!(?exposure, "Exposure updated");
        Ok(())
    }

    fn set_focus(&self, lens_position: Option<u16>) -> Result<(), CameraError> {
        if let Some(position) = lens_position {
            validate_lens_position(position)?;
        }
        self.lock_settings().focus = lens_position;
        tracing::info!(?lens_position, "Focus updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_frame(dir: &Path, name: &str, detections: Option<&str>) -> Vec<u8> {
        let jpeg = render::test_pattern(32, 24, name.len() as u32).unwrap();
        fs::write(dir.join(name), &jpeg).unwrap();
        if let Some(json) = detections {
            fs::write(dir.join(name).with_extension("json"), json).unwrap();
        }
        jpeg
    }

    fn camera_with(frames: Vec<ReplayFrame>, stills: &Path) -> (Arc<FrameBus>, ReplayCamera) {
        let bus = Arc::new(FrameBus::new());
        let camera = ReplayCamera::new(frames, (64, 48), bus.clone(), StillStore::new(stills));
        (bus, camera)
    }

    #[test]
    fn test_load_frames_sorted_with_sidecars() {
        let dir = tempdir().unwrap();
        let b = write_frame(dir.path(), "b.jpg", None);
        let a = write_frame(dir.path(), "a.jpeg", Some("[[10, 20, 50, 80]]"));
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let frames = load_frames(dir.path()).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].name, "a.jpeg");
        assert_eq!(frames[0].jpeg, a);
        assert_eq!(frames[0].detections, vec![DetectionBox::new(10, 20, 50, 80)]);
        assert_eq!(frames[1].name, "b.jpg");
        assert_eq!(frames[1].jpeg, b);
        assert!(frames[1].detections.is_empty());
    }

    #[test]
    fn test_load_frames_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        assert!(load_frames(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_load_frames_rejects_malformed_sidecar() {
        let dir = tempdir().unwrap();
        write_frame(dir.path(), "a.jpg", Some("{\"not\": \"boxes\"}"));
        assert!(load_frames(dir.path()).is_err());
    }

    #[test]
    fn test_load_frames_skips_oversized() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("huge.jpg"), vec![0u8; MAX_FRAME_BYTES + 1]).unwrap();
        write_frame(dir.path(), "ok.jpg", None);

        let frames = load_frames(dir.path()).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "ok.jpg");
    }

    #[test]
    fn test_publish_cycles_recorded_frames() {
        let dir = tempdir().unwrap();
        let frames = vec![
            ReplayFrame {
                name: "one".into(),
                jpeg: vec![0xFF, 0xD8, 1],
                detections: Vec::new(),
            },
            ReplayFrame {
                name: "two".into(),
                jpeg: vec![0xFF, 0xD8, 2],
                detections: Vec::new(),
            },
        ];
        let (bus, camera) = camera_with(frames, dir.path());

        assert_eq!(camera.publish_frame(0).unwrap(), 1);
        assert_eq!(bus.read().frame().as_bytes(), &[0xFF, 0xD8, 1]);
        camera.publish_frame(1).unwrap();
        assert_eq!(bus.read().frame().as_bytes(), &[0xFF, 0xD8, 2]);
        camera.publish_frame(2).unwrap();
        assert_eq!(bus.read().frame().as_bytes(), &[0xFF, 0xD8, 1]);
    }

    #[test]
    fn test_overlay_changes_frame_but_not_detections() {
        let dir = tempdir().unwrap();
        let jpeg = render::test_pattern(64, 48, 0).unwrap();
        let detections = vec![DetectionBox::new(4, 4, 40, 40)];
        let frames = vec![ReplayFrame {
            name: "boxed".into(),
            jpeg: jpeg.clone(),
            detections: detections.clone(),
        }];
        let (bus, camera) = camera_with(frames, dir.path());

        camera.publish_frame(0).unwrap();
        let with_overlay = bus.read();
        assert_ne!(with_overlay.frame().as_bytes(), jpeg.as_slice());
        assert_eq!(with_overlay.detections(), detections.as_slice());

        camera.set_overlay(false).unwrap();
        camera.publish_frame(0).unwrap();
        assert_eq!(bus.read().frame().as_bytes(), jpeg.as_slice());
    }

    #[test]
    fn test_publish_without_frames_uses_pattern() {
        let dir = tempdir().unwrap();
        let (bus, camera) = camera_with(Vec::new(), dir.path());

        camera.publish_frame(0).unwrap();
        let state = bus.read();
        assert_eq!(&state.frame()[..2], &[0xFF, 0xD8]);
        assert!(state.detections().is_empty());
    }

    #[test]
    fn test_controls_validate_and_store() {
        let dir = tempdir().unwrap();
        let (_bus, camera) = camera_with(Vec::new(), dir.path());

        let exposure = Exposure {
            time_us: 500,
            iso: 200,
        };
        camera.set_exposure(Some(exposure)).unwrap();
        camera.set_focus(Some(120)).unwrap();
        assert_eq!(camera.settings().exposure, Some(exposure));
        assert_eq!(camera.settings().focus, Some(120));

        assert!(matches!(
            camera.set_exposure(Some(Exposure { time_us: 0, iso: 200 })),
            Err(CameraError::InvalidValue(_))
        ));
        assert!(matches!(
            camera.set_focus(Some(999)),
            Err(CameraError::InvalidValue(_))
        ));
        // Rejected values leave the previous settings in place.
        assert_eq!(camera.settings().exposure, Some(exposure));
        assert_eq!(camera.settings().focus, Some(120));

        camera.set_exposure(None).unwrap();
        camera.set_focus(None).unwrap();
        assert_eq!(camera.settings().exposure, None);
        assert_eq!(camera.settings().focus, None);
    }

    #[test]
    fn test_save_still_writes_current_frame() {
        let dir = tempdir().unwrap();
        let (bus, camera) = camera_with(Vec::new(), dir.path());

        assert!(matches!(camera.save_still(), Err(CameraError::NoFrame)));

        camera.publish_frame(0).unwrap();
        let path = camera.save_still().unwrap();
        assert_eq!(fs::read(path).unwrap(), bus.read().frame().as_bytes());
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let dir = tempdir().unwrap();
        let (bus, camera) = camera_with(Vec::new(), dir.path());
        let shutdown = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let handle = scope.spawn(|| camera.run(200.0, &shutdown));
            while bus.sequence() < 3 {
                std::thread::sleep(Duration::from_millis(5));
            }
            shutdown.store(true, Ordering::Relaxed);
            handle.join().unwrap().unwrap();
        });

        assert!(bus.sequence() >= 3);
    }
}
