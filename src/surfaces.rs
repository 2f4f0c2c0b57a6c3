//! Image surfaces: one textured plane per image element.

use std::path::PathBuf;

use crate::blend::TEXTURE_SLOTS;
use crate::config::ImageElement;
use crate::events::LoadImage;
use crate::layout::{Layout, Rect, Viewport, surface_position};

#[derive(Debug, Clone, PartialEq)]
pub struct ImageSurface {
    pub index: usize,
    pub path: PathBuf,
    /// Bounds from the most recent layout pass that still reported the element.
    pub bounds: Rect,
    pub position: [f32; 2],
    /// Texture slot sampled for this image, `None` past the shader's slot count.
    pub slot: Option<usize>,
    pub loaded: bool,
}

impl ImageSurface {
    /// Instance data for the renderer: center x, center y, width, height.
    pub fn instance(&self) -> [f32; 4] {
        [
            self.position[0],
            self.position[1],
            self.bounds.width,
            self.bounds.height,
        ]
    }
}

/// Texture slot sampled for image `index`; images past the slot count get none.
fn texture_slot(index: usize) -> Option<usize> {
    (index < TEXTURE_SLOTS).then_some(index)
}

#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    surfaces: Vec<ImageSurface>,
}

impl SurfaceRegistry {
    /// Creates one surface per image, sized and placed from the current layout.
    pub fn build(images: &[ImageElement], layout: &dyn Layout, viewport: Viewport) -> Self {
        let surfaces = images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                let bounds = layout.image_bounds(index, viewport).unwrap_or_default();
                ImageSurface {
                    index,
                    path: image.path.clone(),
                    bounds,
                    position: surface_position(&bounds, viewport),
                    slot: texture_slot(index),
                    loaded: false,
                }
            })
            .collect();
        Self { surfaces }
    }

    /// Re-reads every element's bounds and moves its surface to match.
    ///
    /// Elements the layout no longer reports keep their previous placement.
    /// Returns the number of surfaces updated.
    pub fn reposition(&mut self, layout: &dyn Layout, viewport: Viewport) -> usize {
        let mut updated = 0;
        for surface in &mut self.surfaces {
            match layout.image_bounds(surface.index, viewport) {
                Some(bounds) => {
                    surface.bounds = bounds;
                    surface.position = surface_position(&bounds, viewport);
                    updated += 1;
                }
                None => {
                    tracing::trace!(index = surface.index, "element missing; keeping stale position");
                }
            }
        }
        updated
    }

    /// Decode requests for `images` without building surfaces, using the same slot rule as [`Self::build`].
    pub fn load_requests_for(images: &[ImageElement], max_dimension: u32) -> Vec<LoadImage> {
        images
            .iter()
            .enumerate()
            .filter_map(|(index, image)| {
                texture_slot(index).map(|slot| LoadImage {
                    slot,
                    path: image.path.clone(),
                    max_dimension,
                })
            })
            .collect()
    }

    pub fn mark_loaded(&mut self, slot: usize) {
        if let Some(surface) = self.surfaces.iter_mut().find(|s| s.slot == Some(slot)) {
            surface.loaded = true;
        }
    }

    pub fn instances(&self) -> Vec<[f32; 4]> {
        self.surfaces.iter().map(ImageSurface::instance).collect()
    }

    pub fn get(&self, index: usize) -> Option<&ImageSurface> {
        self.surfaces.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageSurface> {
        self.surfaces.iter()
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn release(&mut self) {
        self.surfaces.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Length;

    fn image(path: &str) -> ImageElement {
        ImageElement {
            path: PathBuf::from(path),
            top: Length::Px(100.0),
            left: Length::Px(50.0),
            width: Length::Px(200.0),
            height: Length::Px(150.0),
        }
    }

    struct Vanishing;

    impl Layout for Vanishing {
        fn image_count(&self) -> usize {
            0
        }
        fn image_bounds(&self, _index: usize, _viewport: Viewport) -> Option<Rect> {
            None
        }
        fn link_count(&self) -> usize {
            0
        }
        fn link_bounds(&self, _index: usize, _viewport: Viewport) -> Option<Rect> {
            None
        }
    }

    #[test]
    fn only_first_four_images_get_slots() {
        let images: Vec<_> = (0..6).map(|i| image(&format!("/img/{i}.jpg"))).collect();
        let layout = crate::layout::PageLayout::new(
            images.iter().map(ImageElement::bounds).collect(),
            vec![],
        );
        let registry = SurfaceRegistry::build(&images, &layout, Viewport::new(800.0, 600.0));
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.iter().filter(|s| s.slot.is_some()).count(), TEXTURE_SLOTS);
        assert_eq!(registry.get(5).and_then(|s| s.slot), None);
    }

    #[test]
    fn requests_without_layout_match_registry() {
        let images: Vec<_> = (0..6).map(|i| image(&format!("/img/{i}.jpg"))).collect();
        let layout = crate::layout::PageLayout::new(
            images.iter().map(ImageElement::bounds).collect(),
            vec![],
        );
        let registry = SurfaceRegistry::build(&images, &layout, Viewport::new(800.0, 600.0));
        let from_registry: Vec<_> = registry
            .iter()
            .filter_map(|s| s.slot.map(|slot| (slot, s.path.clone())))
            .collect();
        let direct: Vec<_> = SurfaceRegistry::load_requests_for(&images, 1024)
            .into_iter()
            .map(|r| (r.slot, r.path))
            .collect();
        assert_eq!(direct, from_registry);
        assert_eq!(direct.len(), TEXTURE_SLOTS);
        assert_eq!(direct[3], (3, PathBuf::from("/img/3.jpg")));
    }

    #[test]
    fn missing_elements_keep_stale_position() {
        let images = vec![image("/img/a.jpg")];
        let layout = crate::layout::PageLayout::new(vec![images[0].bounds()], vec![]);
        let mut registry = SurfaceRegistry::build(&images, &layout, Viewport::new(800.0, 600.0));
        let before = registry.get(0).cloned().expect("surface");
        let updated = registry.reposition(&Vanishing, Viewport::new(400.0, 300.0));
        assert_eq!(updated, 0);
        assert_eq!(registry.get(0), Some(&before));
    }

    #[test]
    fn mark_loaded_tracks_slot() {
        let images = vec![image("/img/a.jpg"), image("/img/b.jpg")];
        let layout = crate::layout::PageLayout::new(
            images.iter().map(ImageElement::bounds).collect(),
            vec![],
        );
        let mut registry = SurfaceRegistry::build(&images, &layout, Viewport::new(800.0, 600.0));
        registry.mark_loaded(1);
        let loaded: Vec<_> = registry.iter().map(|s| s.loaded).collect();
        assert_eq!(loaded, vec![false, true]);
    }
}
