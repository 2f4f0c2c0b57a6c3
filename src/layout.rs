//! Page geometry: element bounds, the viewport, and the pixel-exact camera.
//!
//! Everything here works in logical pixels. The renderer applies the window
//! scale factor when it configures the swapchain, so one logical pixel at the
//! image plane is one world unit regardless of display density.

use winit::dpi::PhysicalSize;

use crate::config::{CameraConfig, Configuration, ElementBox};

pub type Mat4 = [[f32; 4]; 4];

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub top: f32,
    pub left: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(top: f32, left: f32, width: f32, height: f32) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    /// Half-open containment test in layout coordinates (origin top-left, y down).
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.left + self.width && y >= self.top && y < self.top + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    /// Clamps to at least one pixel per side so the aspect stays finite.
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width: width.max(1.0),
            height: height.max(1.0),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn from_physical(size: PhysicalSize<u32>, scale_factor: f64) -> Self {
        let scale = if scale_factor.is_finite() && scale_factor > 0.0 {
            scale_factor
        } else {
            1.0
        };
        let logical = size.to_logical::<f64>(scale);
        Self::new(logical.width as f32, logical.height as f32)
    }

    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }
}

/// World-space center of a surface that must overlap `bounds` pixel-for-pixel.
pub fn surface_position(bounds: &Rect, viewport: Viewport) -> [f32; 2] {
    let x = bounds.left - viewport.width / 2.0 + bounds.width / 2.0;
    let y = -bounds.top + viewport.height / 2.0 - bounds.height / 2.0;
    [x, y]
}

/// Perspective camera looking down -Z from `distance`, with a vertical field of
/// view chosen so the z = 0 plane maps one world unit to one logical pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    distance: f32,
    near: f32,
    far: f32,
    fov_y: f32,
    aspect: f32,
}

impl Camera {
    pub fn new(cfg: &CameraConfig, viewport: Viewport) -> Self {
        let mut camera = Self {
            distance: cfg.distance,
            near: cfg.near,
            far: cfg.far,
            fov_y: 0.0,
            aspect: 1.0,
        };
        camera.set_viewport(viewport);
        camera
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.aspect = viewport.aspect();
        self.fov_y = 2.0 * (viewport.height / 2.0 / self.distance).atan();
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn fov_degrees(&self) -> f32 {
        self.fov_y.to_degrees()
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Right-handed projection with a 0..1 depth range, column-major.
    pub fn projection(&self) -> Mat4 {
        let f = 1.0 / (self.fov_y / 2.0).tan();
        let range = self.near - self.far;
        [
            [f / self.aspect, 0.0, 0.0, 0.0],
            [0.0, f, 0.0, 0.0],
            [0.0, 0.0, self.far / range, -1.0],
            [0.0, 0.0, self.near * self.far / range, 0.0],
        ]
    }

    pub fn view(&self) -> Mat4 {
        [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, -self.distance, 1.0],
        ]
    }

    pub fn view_projection(&self) -> Mat4 {
        mat4_mul(&self.projection(), &self.view())
    }
}

pub fn mat4_mul(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [[0.0; 4]; 4];
    for (col, out_col) in out.iter_mut().enumerate() {
        for (row, cell) in out_col.iter_mut().enumerate() {
            *cell = (0..4).map(|k| a[k][row] * b[col][k]).sum();
        }
    }
    out
}

pub fn transform_point(m: &Mat4, p: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (row, cell) in out.iter_mut().enumerate() {
        *cell = (0..4).map(|k| m[k][row] * p[k]).sum();
    }
    out
}

/// Source of element bounding boxes, queried on every layout pass.
///
/// Returning `None` means the element is gone; callers keep whatever they
/// computed last for it.
pub trait Layout {
    fn image_count(&self) -> usize;
    fn image_bounds(&self, index: usize, viewport: Viewport) -> Option<Rect>;
    fn link_count(&self) -> usize;
    fn link_bounds(&self, index: usize, viewport: Viewport) -> Option<Rect>;

    /// First link whose bounds contain the point.
    fn link_at(&self, x: f32, y: f32, viewport: Viewport) -> Option<usize> {
        (0..self.link_count()).find(|&idx| {
            self.link_bounds(idx, viewport)
                .is_some_and(|rect| rect.contains(x, y))
        })
    }
}

/// Layout backed by the `images` and `links` sections of the configuration.
#[derive(Debug, Clone)]
pub struct PageLayout {
    images: Vec<ElementBox>,
    links: Vec<ElementBox>,
}

impl PageLayout {
    pub fn new(images: Vec<ElementBox>, links: Vec<ElementBox>) -> Self {
        Self { images, links }
    }

    pub fn from_config(cfg: &Configuration) -> Self {
        Self::new(
            cfg.images.iter().map(|img| img.bounds()).collect(),
            cfg.links.iter().map(|link| link.bounds()).collect(),
        )
    }
}

fn resolve(bounds: &ElementBox, viewport: Viewport) -> Rect {
    Rect {
        top: bounds.top.resolve(viewport.height),
        left: bounds.left.resolve(viewport.width),
        width: bounds.width.resolve(viewport.width),
        height: bounds.height.resolve(viewport.height),
    }
}

impl Layout for PageLayout {
    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn image_bounds(&self, index: usize, viewport: Viewport) -> Option<Rect> {
        self.images.get(index).map(|b| resolve(b, viewport))
    }

    fn link_count(&self) -> usize {
        self.links.len()
    }

    fn link_bounds(&self, index: usize, viewport: Viewport) -> Option<Rect> {
        self.links.get(index).map(|b| resolve(b, viewport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Length;

    fn approx(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-3, "{a} != {b}");
    }

    #[test]
    fn image_plane_maps_one_pixel_to_one_unit() {
        let viewport = Viewport::new(1000.0, 800.0);
        let camera = Camera::new(&CameraConfig::default(), viewport);
        let vp = camera.view_projection();

        // Right edge of the viewport at the image plane lands on NDC x = 1.
        let edge = transform_point(&vp, [500.0, 400.0, 0.0, 1.0]);
        approx(edge[0] / edge[3], 1.0);
        approx(edge[1] / edge[3], 1.0);
        let depth = edge[2] / edge[3];
        assert!((0.0..=1.0).contains(&depth), "depth {depth} outside clip range");
    }

    #[test]
    fn fov_follows_viewport_height() {
        let mut camera = Camera::new(&CameraConfig::default(), Viewport::new(1000.0, 800.0));
        approx(camera.fov_degrees(), 2.0 * (400.0f32 / 200.0).atan().to_degrees());
        camera.set_viewport(Viewport::new(500.0, 400.0));
        approx(camera.aspect(), 1.25);
        approx(camera.fov_degrees(), 90.0);
    }

    #[test]
    fn link_hit_test_prefers_first_match() {
        let px = Length::Px;
        let bounds = |top, left| ElementBox {
            top: px(top),
            left: px(left),
            width: px(100.0),
            height: px(20.0),
        };
        let layout = PageLayout::new(vec![], vec![bounds(10.0, 10.0), bounds(10.0, 50.0)]);
        let vp = Viewport::new(400.0, 300.0);
        assert_eq!(layout.link_at(60.0, 15.0, vp), Some(0));
        assert_eq!(layout.link_at(120.0, 15.0, vp), Some(1));
        // Right and bottom edges are exclusive.
        assert_eq!(layout.link_at(150.0, 15.0, vp), None);
        assert_eq!(layout.link_at(120.0, 30.0, vp), None);
        assert_eq!(layout.link_at(120.0, 31.0, vp), None);
    }

    #[test]
    fn percentages_resolve_against_container() {
        let layout = PageLayout::new(
            vec![ElementBox {
                top: Length::Percent(10.0),
                left: Length::Percent(50.0),
                width: Length::Percent(25.0),
                height: Length::Px(120.0),
            }],
            vec![],
        );
        let rect = layout
            .image_bounds(0, Viewport::new(800.0, 600.0))
            .expect("image 0");
        assert_eq!(rect, Rect::new(60.0, 400.0, 200.0, 120.0));
    }

    #[test]
    fn viewport_uses_logical_pixels() {
        let vp = Viewport::from_physical(PhysicalSize::new(2000, 1600), 2.0);
        assert_eq!(vp, Viewport::new(1000.0, 800.0));
        let clamped = Viewport::from_physical(PhysicalSize::new(0, 0), 1.0);
        assert_eq!(clamped, Viewport::new(1.0, 1.0));
    }
}
