use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::capture::{ControllerConfig, Facing, PhotoStore, Size, DEFAULT_MAX_ZOOM, TARGET_SIZE};
use crate::detect::{DEFAULT_INPUT_HEIGHT, DEFAULT_INPUT_WIDTH};
use crate::pipeline::{
    PipelineSettings, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD, DEFAULT_LABEL,
    DEFAULT_OVERLAY_COLOR, DEFAULT_OVERLAY_THICKNESS,
};

const DEFAULT_CAMERA_DEVICE: &str = "stub://camera";
const DEFAULT_TARGET_FPS: u32 = 15;
const DEFAULT_EXPORT_DIR: &str = "exports";
const DEFAULT_PHOTO_DIR: &str = "photos";

#[derive(Debug, Deserialize, Default)]
struct FramegateConfigFile {
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    overlay: Option<OverlayConfigFile>,
    export: Option<ExportConfigFile>,
    photos: Option<PhotoConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    facing: Option<String>,
    target_fps: Option<u32>,
    target_width: Option<u32>,
    target_height: Option<u32>,
    max_zoom: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    enabled: Option<bool>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    enabled: Option<bool>,
    color: Option<[u8; 3]>,
    thickness: Option<u32>,
    label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ExportConfigFile {
    enabled: Option<bool>,
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct PhotoConfigFile {
    enabled: Option<bool>,
    dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FramegateConfig {
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub overlay: OverlaySettings,
    pub export: ExportSettings,
    pub photos: PhotoSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub facing: Facing,
    pub target_fps: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub max_zoom: f32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub enabled: bool,
    /// ONNX model; without one the pipeline runs letterbox and export only.
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub enabled: bool,
    pub color: [u8; 3],
    pub thickness: u32,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PhotoSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl FramegateConfig {
    /// Load from the file named by `FRAMEGATE_CONFIG` (if any), then apply
    /// env overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRAMEGATE_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like [`load`](Self::load) with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FramegateConfigFile) -> Result<Self> {
        let camera = file.camera.unwrap_or_default();
        let facing = match camera.facing.as_deref() {
            Some(facing) => facing.parse()?,
            None => Facing::Back,
        };
        let camera = CameraSettings {
            device: camera
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            facing,
            target_fps: camera.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            target_width: camera.target_width.unwrap_or(TARGET_SIZE.width),
            target_height: camera.target_height.unwrap_or(TARGET_SIZE.height),
            max_zoom: camera.max_zoom.unwrap_or(DEFAULT_MAX_ZOOM),
        };

        let detection = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            enabled: detection.enabled.unwrap_or(true),
            model_path: detection.model_path,
            input_width: detection.input_width.unwrap_or(DEFAULT_INPUT_WIDTH),
            input_height: detection.input_height.unwrap_or(DEFAULT_INPUT_HEIGHT),
            confidence_threshold: detection
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
        };

        let overlay = file.overlay.unwrap_or_default();
        let overlay = OverlaySettings {
            enabled: overlay.enabled.unwrap_or(true),
            color: overlay.color.unwrap_or(DEFAULT_OVERLAY_COLOR),
            thickness: overlay.thickness.unwrap_or(DEFAULT_OVERLAY_THICKNESS),
            label: overlay.label.unwrap_or_else(|| DEFAULT_LABEL.to_string()),
        };

        let export = file.export.unwrap_or_default();
        let export = ExportSettings {
            enabled: export.enabled.unwrap_or(false),
            dir: export
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_DIR)),
        };

        let photos = file.photos.unwrap_or_default();
        let photos = PhotoSettings {
            enabled: photos.enabled.unwrap_or(true),
            dir: photos.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_PHOTO_DIR)),
        };

        Ok(Self {
            camera,
            detection,
            overlay,
            export,
            photos,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("FRAMEGATE_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(facing) = std::env::var("FRAMEGATE_FACING") {
            if !facing.trim().is_empty() {
                self.camera.facing = facing.parse()?;
            }
        }
        if let Ok(path) = std::env::var("FRAMEGATE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detection.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(value) = std::env::var("FRAMEGATE_CONFIDENCE") {
            self.detection.confidence_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("FRAMEGATE_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(value) = std::env::var("FRAMEGATE_IOU") {
            self.detection.iou_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("FRAMEGATE_IOU must be a number in [0, 1]"))?;
        }
        if let Ok(dir) = std::env::var("FRAMEGATE_EXPORT_DIR") {
            if !dir.trim().is_empty() {
                self.export.dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("FRAMEGATE_PHOTO_DIR") {
            if !dir.trim().is_empty() {
                self.photos.dir = PathBuf::from(dir);
            }
        }
        if let Ok(flag) = std::env::var("FRAMEGATE_EXPORT") {
            self.export.enabled = parse_flag(&flag);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.pipeline_settings().validate()?;
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera.target_fps must be greater than zero"));
        }
        if self.camera.target_width == 0 || self.camera.target_height == 0 {
            return Err(anyhow!("camera target size must be non-zero"));
        }
        if !self.camera.max_zoom.is_finite() || self.camera.max_zoom < 1.0 {
            return Err(anyhow!("camera.max_zoom must be at least 1.0"));
        }
        if self.detection.input_width == 0 || self.detection.input_height == 0 {
            return Err(anyhow!("detection input size must be non-zero"));
        }
        Ok(())
    }

    /// Per-frame pipeline settings derived from this config.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            detection_enabled: self.detection.enabled,
            confidence_threshold: self.detection.confidence_threshold,
            iou_threshold: self.detection.iou_threshold,
            overlay_enabled: self.overlay.enabled,
            overlay_color: self.overlay.color,
            overlay_thickness: self.overlay.thickness,
            label: self.overlay.label.clone(),
            export_enabled: self.export.enabled,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            facing: self.camera.facing,
            target_size: Size::new(self.camera.target_width, self.camera.target_height),
            max_zoom: self.camera.max_zoom,
            photos: self
                .photos
                .enabled
                .then(|| PhotoStore::new(self.photos.dir.clone())),
        }
    }
}

fn read_config_file(path: &Path) -> Result<FramegateConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() -> Result<()> {
        let cfg = FramegateConfig::from_file(FramegateConfigFile::default())?;
        cfg.validate()?;
        assert_eq!(cfg.camera.device, "stub://camera");
        assert_eq!(cfg.camera.facing, Facing::Back);
        assert_eq!(cfg.camera.target_fps, 15);
        assert_eq!((cfg.camera.target_width, cfg.camera.target_height), (1280, 720));
        assert_eq!(cfg.camera.max_zoom, 10.0);
        assert_eq!((cfg.detection.input_width, cfg.detection.input_height), (416, 416));
        assert_eq!(cfg.overlay.color, [0, 39, 76]);
        assert_eq!(cfg.overlay.thickness, 10);
        assert!(!cfg.export.enabled);
        assert!(cfg.photos.enabled);
        assert!(cfg.controller_config().photos.is_some());
        Ok(())
    }

    #[test]
    fn flags_parse_loosely() {
        assert!(parse_flag("YES"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("nope"));
    }

    #[test]
    fn invalid_values_are_rejected() -> Result<()> {
        let mut cfg = FramegateConfig::from_file(FramegateConfigFile::default())?;
        cfg.camera.max_zoom = 0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = FramegateConfig::from_file(FramegateConfigFile::default())?;
        cfg.detection.iou_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = FramegateConfig::from_file(FramegateConfigFile::default())?;
        cfg.overlay.thickness = 0;
        assert!(cfg.validate().is_err());
        Ok(())
    }
}
