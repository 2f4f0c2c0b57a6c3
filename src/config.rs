use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::blend::TEXTURE_SLOTS;

/// A layout length, either absolute logical pixels or a share of the container.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawLength")]
pub enum Length {
    Px(f32),
    Percent(f32),
}

impl Length {
    /// Resolves the length against the container extent along the same axis.
    pub fn resolve(self, extent: f32) -> f32 {
        match self {
            Length::Px(px) => px,
            Length::Percent(pct) => extent * pct / 100.0,
        }
    }

    fn is_negative(self) -> bool {
        match self {
            Length::Px(v) | Length::Percent(v) => v < 0.0,
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Length::Px(px) => write!(f, "{px}px"),
            Length::Percent(pct) => write!(f, "{pct}%"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLength {
    Number(f64),
    Text(String),
}

impl TryFrom<RawLength> for Length {
    type Error = String;

    fn try_from(raw: RawLength) -> Result<Self, Self::Error> {
        let parsed = match raw {
            RawLength::Number(v) => Length::Px(v as f32),
            RawLength::Text(text) => {
                let trimmed = text.trim();
                let (number, percent) = if let Some(stripped) = trimmed.strip_suffix('%') {
                    (stripped, true)
                } else if let Some(stripped) = trimmed.strip_suffix("px") {
                    (stripped, false)
                } else {
                    (trimmed, false)
                };
                let value: f32 = number
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid length '{text}': expected px or percent"))?;
                if percent {
                    Length::Percent(value)
                } else {
                    Length::Px(value)
                }
            }
        };
        match parsed {
            Length::Px(v) | Length::Percent(v) if !v.is_finite() => {
                Err(format!("length must be finite, got {v}"))
            }
            ok => Ok(ok),
        }
    }
}

/// Bounding box of a page element, resolved against the container on every layout pass.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ElementBox {
    pub top: Length,
    pub left: Length,
    pub width: Length,
    pub height: Length,
}

/// One image shown on the page. Only the first four images are bound to texture slots.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageElement {
    pub path: PathBuf,
    pub top: Length,
    pub left: Length,
    pub width: Length,
    pub height: Length,
}

impl ImageElement {
    pub fn bounds(&self) -> ElementBox {
        ElementBox {
            top: self.top,
            left: self.left,
            width: self.width,
            height: self.height,
        }
    }
}

/// A navigation link; hovering its region starts a transition toward the image with the same index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LinkElement {
    #[serde(default)]
    pub label: Option<String>,
    pub top: Length,
    pub left: Length,
    pub width: Length,
    pub height: Length,
}

impl LinkElement {
    pub fn bounds(&self) -> ElementBox {
        ElementBox {
            top: self.top,
            left: self.left,
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct WindowConfig {
    pub title: String,
    /// Initial inner width in logical pixels.
    pub width: u32,
    /// Initial inner height in logical pixels.
    pub height: u32,
    /// Request a transparent window so the clear color alpha shows the desktop.
    pub transparent: bool,
    pub clear_color: [f32; 4],
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "navbar crossfade".to_string(),
            width: 1280,
            height: 800,
            transparent: false,
            clear_color: [0.06, 0.06, 0.07, 1.0],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CameraConfig {
    /// Distance from the camera to the image plane; one pixel maps to one world unit there.
    pub distance: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            distance: 200.0,
            near: 100.0,
            far: 2000.0,
        }
    }
}

/// What a new hover does with transitions that are still animating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    /// Leave older transitions running; each still commits its index swap when it starts.
    #[default]
    Keep,
    /// Drop older transitions, including swaps that have not committed yet.
    Cancel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct TransitionConfig {
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Value the blend progress animates toward. The visible crossfade happens between 0 and 1.
    pub target_progress: f32,
    pub initial_progress: f32,
    pub start_index: Option<usize>,
    pub end_index: Option<usize>,
    pub on_overlap: OverlapPolicy,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(2),
            target_progress: 4.0,
            initial_progress: 0.2,
            start_index: None,
            end_index: None,
            on_overlap: OverlapPolicy::Keep,
        }
    }
}

impl TransitionConfig {
    /// Initial `(start, end)` pair for `image_count` images.
    ///
    /// `image_count` must be at least one; [`Configuration::validated`] guarantees it.
    pub fn initial_indices(&self, image_count: usize) -> (usize, usize) {
        debug_assert!(image_count > 0, "blend indices need at least one image");
        let last = image_count.saturating_sub(1);
        let start = self.start_index.unwrap_or(0).min(last);
        let end = self.end_index.unwrap_or(1).min(last);
        (start, end)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Amount the shader clock advances per frame, independent of wall time.
    pub time_step: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { time_step: 0.1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct LoaderConfig {
    pub max_concurrent_decodes: usize,
    /// Decoded images larger than this on either side are downscaled before upload.
    pub max_texture_dimension: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_decodes: 4,
            max_texture_dimension: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct LinkStyle {
    pub color: [f32; 4],
    pub hover_color: [f32; 4],
}

impl Default for LinkStyle {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0, 0.08],
            hover_color: [1.0, 1.0, 1.0, 0.25],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    pub window: WindowConfig,
    pub camera: CameraConfig,
    pub transition: TransitionConfig,
    pub render: RenderConfig,
    pub loader: LoaderConfig,
    pub links_style: LinkStyle,
    /// Images in display order; the index is what links and blend indices refer to.
    pub images: Vec<ImageElement>,
    pub links: Vec<LinkElement>,
}

impl Configuration {
    /// Parse from a YAML file. Relative image paths resolve against the file's directory.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut cfg: Self = serde_yaml::from_str(&s)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        if let Some(base) = path.parent() {
            cfg.resolve_image_paths(base);
        }
        Ok(cfg)
    }

    pub fn resolve_image_paths(&mut self, base: &Path) {
        for image in &mut self.images {
            if image.path.is_relative() {
                image.path = base.join(&image.path);
            }
        }
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        let count = self.images.len();
        ensure!(count > 0, "images must list at least one element");
        if let Some(start) = self.transition.start_index {
            ensure!(
                start < count,
                "transition.start-index {start} is out of range for {count} images"
            );
        }
        if let Some(end) = self.transition.end_index {
            ensure!(
                end < count,
                "transition.end-index {end} is out of range for {count} images"
            );
        }
        ensure!(
            !self.transition.duration.is_zero(),
            "transition.duration must be greater than zero"
        );
        ensure!(
            self.transition.target_progress.is_finite() && self.transition.target_progress > 0.0,
            "transition.target-progress must be a positive number"
        );
        ensure!(
            self.transition.initial_progress.is_finite(),
            "transition.initial-progress must be finite"
        );
        ensure!(
            self.render.time_step.is_finite() && self.render.time_step > 0.0,
            "render.time-step must be a positive number"
        );
        let cam = &self.camera;
        ensure!(
            cam.near.is_finite() && cam.distance.is_finite() && cam.far.is_finite(),
            "camera parameters must be finite"
        );
        ensure!(
            cam.near > 0.0 && cam.near < cam.distance && cam.distance < cam.far,
            "camera must satisfy 0 < near < distance < far"
        );
        ensure!(
            self.loader.max_concurrent_decodes > 0,
            "loader.max-concurrent-decodes must be greater than zero"
        );
        ensure!(
            self.loader.max_texture_dimension > 0,
            "loader.max-texture-dimension must be greater than zero"
        );
        ensure!(
            self.window.width > 0 && self.window.height > 0,
            "window size must be non-zero"
        );
        for (idx, image) in self.images.iter().enumerate() {
            ensure!(
                !image.width.is_negative() && !image.height.is_negative(),
                "images[{idx}] width/height must not be negative"
            );
        }
        for (idx, link) in self.links.iter().enumerate() {
            ensure!(
                !link.width.is_negative() && !link.height.is_negative(),
                "links[{idx}] width/height must not be negative"
            );
        }
        if count > TEXTURE_SLOTS {
            tracing::warn!(
                images = count,
                slots = TEXTURE_SLOTS,
                "more images than texture slots; extra images will not be sampled"
            );
        }
        if self.links.len() > count {
            tracing::warn!(
                links = self.links.len(),
                images = count,
                "links without a matching image will be ignored on hover"
            );
        }
        Ok(self)
    }
}
