//! Processed-video export.
//!
//! [`ExportSink`] is the container writer; [`Recorder`] enforces its
//! lifecycle so frames are only appended between `start` and `stop`.
//! Sink errors are returned to the caller and never retried here.

#[cfg(feature = "export-ffmpeg")]
mod ffmpeg;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

#[cfg(feature = "export-ffmpeg")]
pub use ffmpeg::FfmpegSink;

/// Frame rate written into exported containers.
pub const EXPORT_FPS: u32 = 15;

/// Video container writer.
pub trait ExportSink: Send {
    fn name(&self) -> &'static str;

    /// Open `path` for `width`x`height` frames.
    fn start(&mut self, width: u32, height: u32, path: &Path) -> Result<()>;

    fn append_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and finalize so the file is complete on disk.
    fn stop(&mut self) -> Result<()>;
}

/// `<dir>/Processed_<unix_millis>.mp4`, creating `dir` if needed.
pub fn output_path(dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create export dir {}", dir.display()))?;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_millis();
    Ok(dir.join(format!("Processed_{}.mp4", millis)))
}

/// Summary of a finished recording.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recording {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frames: u64,
}

/// Lifecycle guard around an [`ExportSink`].
pub struct Recorder {
    sink: Box<dyn ExportSink>,
    active: Option<Recording>,
}

impl Recorder {
    pub fn new(sink: Box<dyn ExportSink>) -> Self {
        Self { sink, active: None }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn current(&self) -> Option<&Recording> {
        self.active.as_ref()
    }

    pub fn start(&mut self, width: u32, height: u32, path: &Path) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(anyhow!(
                "already recording to {}",
                active.path.display()
            ));
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("invalid export size {}x{}", width, height));
        }
        self.sink
            .start(width, height, path)
            .with_context(|| format!("{} start {}", self.sink.name(), path.display()))?;
        log::info!(
            "Recorder: recording {}x{} to {}",
            width,
            height,
            path.display()
        );
        self.active = Some(Recording {
            path: path.to_path_buf(),
            width,
            height,
            frames: 0,
        });
        Ok(())
    }

    pub fn append_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| anyhow!("append_frame outside of a recording"))?;
        if frame.dimensions() != (active.width, active.height) {
            return Err(anyhow!(
                "frame {}x{} does not match recording {}x{}",
                frame.width(),
                frame.height(),
                active.width,
                active.height
            ));
        }
        self.sink
            .append_frame(frame)
            .with_context(|| format!("{} append frame {}", self.sink.name(), active.frames))?;
        active.frames += 1;
        Ok(())
    }

    /// Finalize the current recording. `Ok(None)` when nothing was recording.
    ///
    /// The recorder is idle afterwards even if the sink fails to finalize.
    pub fn stop(&mut self) -> Result<Option<Recording>> {
        let Some(recording) = self.active.take() else {
            return Ok(None);
        };
        self.sink.stop().with_context(|| {
            format!(
                "{} finalize {}",
                self.sink.name(),
                recording.path.display()
            )
        })?;
        log::info!(
            "Recorder: wrote {} frames to {}",
            recording.frames,
            recording.path.display()
        );
        Ok(Some(recording))
    }
}

// ----------------------------------------------------------------------------
// In-memory sink
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryState {
    pub path: Option<PathBuf>,
    pub size: Option<(u32, u32)>,
    pub frames: Vec<RgbImage>,
    pub started: u32,
    pub stopped: u32,
}

/// Sink that keeps frames in memory. Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every append once `frames` frames have been accepted.
    pub fn failing_after(frames: usize) -> Self {
        Self {
            fail_after: Some(frames),
            ..Self::default()
        }
    }

    pub fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))
    }

    pub fn frame_count(&self) -> usize {
        self.state().map(|state| state.frames.len()).unwrap_or(0)
    }
}

impl ExportSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn start(&mut self, width: u32, height: u32, path: &Path) -> Result<()> {
        let mut state = self.state()?;
        state.path = Some(path.to_path_buf());
        state.size = Some((width, height));
        state.frames.clear();
        state.started += 1;
        Ok(())
    }

    fn append_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let mut state = self.state()?;
        if let Some(limit) = self.fail_after {
            if state.frames.len() >= limit {
                return Err(anyhow!("disk full"));
            }
        }
        state.frames.push(frame.clone());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.state()?.stopped += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([1, 2, 3]))
    }

    #[test]
    fn append_only_between_start_and_stop() -> Result<()> {
        let sink = MemorySink::new();
        let mut recorder = Recorder::new(Box::new(sink.clone()));
        assert!(recorder.append_frame(&frame(4, 4)).is_err());

        recorder.start(4, 4, Path::new("out.mp4"))?;
        recorder.append_frame(&frame(4, 4))?;
        recorder.append_frame(&frame(4, 4))?;
        let recording = recorder.stop()?.context("recording")?;
        assert_eq!(recording.frames, 2);
        assert!(recorder.append_frame(&frame(4, 4)).is_err());

        let state = sink.state()?;
        assert_eq!(state.frames.len(), 2);
        assert_eq!((state.started, state.stopped), (1, 1));
        assert_eq!(state.size, Some((4, 4)));
        Ok(())
    }

    #[test]
    fn mismatched_frames_and_double_start_are_rejected() -> Result<()> {
        let mut recorder = Recorder::new(Box::new(MemorySink::new()));
        recorder.start(4, 4, Path::new("a.mp4"))?;
        assert!(recorder.append_frame(&frame(8, 4)).is_err());
        assert!(recorder.start(4, 4, Path::new("b.mp4")).is_err());
        assert!(recorder.start(0, 4, Path::new("c.mp4")).is_err());
        Ok(())
    }

    #[test]
    fn stop_without_recording_is_noop() -> Result<()> {
        let mut recorder = Recorder::new(Box::new(MemorySink::new()));
        assert_eq!(recorder.stop()?, None);
        Ok(())
    }

    #[test]
    fn sink_errors_propagate() -> Result<()> {
        let mut recorder = Recorder::new(Box::new(MemorySink::failing_after(1)));
        recorder.start(2, 2, Path::new("x.mp4"))?;
        recorder.append_frame(&frame(2, 2))?;
        let err = recorder
            .append_frame(&frame(2, 2))
            .expect_err("second append fails");
        assert!(format!("{:#}", err).contains("disk full"));
        assert_eq!(recorder.current().map(|r| r.frames), Some(1));
        Ok(())
    }

    #[test]
    fn output_path_is_timestamped_mp4() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = output_path(&dir.path().join("videos"))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("file name")?;
        assert!(name.starts_with("Processed_"));
        assert!(name.ends_with(".mp4"));
        assert!(dir.path().join("videos").is_dir());
        Ok(())
    }
}
