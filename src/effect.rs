//! The effect controller: blend state, viewport, camera and surfaces in one owned context.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::blend::{BlendState, Commit, TransitionSequencer};
use crate::config::{Configuration, LinkStyle};
use crate::layout::{Camera, Layout, Mat4, Viewport, surface_position};
use crate::surfaces::SurfaceRegistry;

pub struct EffectContext {
    layout: Box<dyn Layout>,
    viewport: Viewport,
    camera: Camera,
    surfaces: SurfaceRegistry,
    sequencer: TransitionSequencer,
    hovered: Option<usize>,
    link_style: LinkStyle,
}

impl EffectContext {
    pub fn new(cfg: &Configuration, layout: Box<dyn Layout>, viewport: Viewport) -> Self {
        let surfaces = SurfaceRegistry::build(&cfg.images, layout.as_ref(), viewport);
        let sequencer = TransitionSequencer::new(surfaces.len(), &cfg.transition);
        Self {
            camera: Camera::new(&cfg.camera, viewport),
            layout,
            viewport,
            surfaces,
            sequencer,
            hovered: None,
            link_style: cfg.links_style.clone(),
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }

    pub fn surfaces_mut(&mut self) -> &mut SurfaceRegistry {
        &mut self.surfaces
    }

    pub fn blend_state(&self) -> BlendState {
        self.sequencer.state()
    }

    pub fn sequencer(&self) -> &TransitionSequencer {
        &self.sequencer
    }

    pub fn hovered_link(&self) -> Option<usize> {
        self.hovered
    }

    /// Container changed size: update camera aspect and field of view, then re-run layout.
    pub fn resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.camera.set_viewport(viewport);
        tracing::debug!(
            width = viewport.width,
            height = viewport.height,
            aspect = self.camera.aspect(),
            "viewport resized"
        );
        self.reposition();
    }

    pub fn reposition(&mut self) -> usize {
        self.surfaces.reposition(self.layout.as_ref(), self.viewport)
    }

    /// Starts a transition toward image `link`, exactly like entering that link.
    pub fn hover(&mut self, link: usize, now: Instant) -> bool {
        self.sequencer.hover(link, now)
    }

    /// Pointer moved to `(x, y)` in logical pixels. Fires a hover only on entering a link.
    pub fn pointer_moved(&mut self, x: f32, y: f32, now: Instant) -> Option<usize> {
        let hit = self.layout.link_at(x, y, self.viewport);
        if hit == self.hovered {
            return None;
        }
        self.hovered = hit;
        let link = hit?;
        tracing::debug!(link, "pointer entered link");
        self.sequencer.hover(link, now).then_some(link)
    }

    pub fn pointer_left(&mut self) {
        self.hovered = None;
    }

    /// Advances the blend scheduler; returns the swaps committed on this advance.
    pub fn advance(&mut self, now: Instant) -> Vec<Commit> {
        self.sequencer.advance(now)
    }

    /// Per-link instance data (center x, center y, width, height) with its fill color.
    pub fn link_instances(&self) -> Vec<([f32; 4], [f32; 4])> {
        (0..self.layout.link_count())
            .filter_map(|idx| {
                let bounds = self.layout.link_bounds(idx, self.viewport)?;
                let [x, y] = surface_position(&bounds, self.viewport);
                let color = if self.hovered == Some(idx) {
                    self.link_style.hover_color
                } else {
                    self.link_style.color
                };
                Some(([x, y, bounds.width, bounds.height], color))
            })
            .collect()
    }

    pub fn link_count(&self) -> usize {
        self.layout.link_count()
    }

    /// Drops every surface; the renderer releases the matching textures.
    pub fn release(&mut self) {
        self.surfaces.release();
        self.hovered = None;
    }
}

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInputs {
    pub time: f32,
    pub blend: BlendState,
    pub view_proj: Mat4,
    pub commits: Vec<Commit>,
}

/// The self-rescheduling frame loop as an explicit task.
///
/// The clock advances by a fixed step per tick, so animation speed follows the
/// display refresh rate. Each tick ends at the host's next-frame request.
pub struct RenderTask {
    time: f32,
    step: f32,
    frames: u64,
    cancel: CancellationToken,
}

impl RenderTask {
    pub fn new(step: f32, cancel: CancellationToken) -> Self {
        Self {
            time: 0.0,
            step,
            frames: 0,
            cancel,
        }
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs one frame of bookkeeping. Returns `None` once the task is cancelled.
    pub fn tick(&mut self, ctx: &mut EffectContext, now: Instant) -> Option<FrameInputs> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.time += self.step;
        self.frames += 1;
        let commits = ctx.advance(now);
        Some(FrameInputs {
            time: self.time,
            blend: ctx.blend_state(),
            view_proj: ctx.camera().view_projection(),
            commits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImageElement, Length, LinkElement};
    use crate::layout::PageLayout;
    use std::path::PathBuf;

    fn config() -> Configuration {
        let px = Length::Px;
        Configuration {
            images: (0..2)
                .map(|i| ImageElement {
                    path: PathBuf::from(format!("/img/{i}.png")),
                    top: px(0.0),
                    left: px(i as f32 * 100.0),
                    width: px(100.0),
                    height: px(100.0),
                })
                .collect(),
            links: (0..2)
                .map(|i| LinkElement {
                    label: None,
                    top: px(200.0),
                    left: px(i as f32 * 50.0),
                    width: px(50.0),
                    height: px(20.0),
                })
                .collect(),
            ..Configuration::default()
        }
    }

    fn context() -> EffectContext {
        let cfg = config();
        let layout = Box::new(PageLayout::from_config(&cfg));
        EffectContext::new(&cfg, layout, Viewport::new(400.0, 300.0))
    }

    #[test]
    fn pointer_triggers_once_per_entry() {
        let t0 = Instant::now();
        let mut ctx = context();
        assert_eq!(ctx.pointer_moved(60.0, 210.0, t0), Some(1));
        assert_eq!(ctx.pointer_moved(70.0, 212.0, t0), None, "moving inside the link");
        assert_eq!(ctx.sequencer().in_flight(), 1);
        ctx.pointer_left();
        assert_eq!(ctx.pointer_moved(70.0, 212.0, t0), Some(1), "re-entry fires again");
    }

    #[test]
    fn hovered_link_uses_highlight_color() {
        let t0 = Instant::now();
        let mut ctx = context();
        ctx.pointer_moved(10.0, 205.0, t0);
        let links = ctx.link_instances();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].1, LinkStyle::default().hover_color);
        assert_eq!(links[1].1, LinkStyle::default().color);
    }

    #[test]
    fn cancelled_task_stops_ticking() {
        let cancel = CancellationToken::new();
        let mut task = RenderTask::new(0.1, cancel.clone());
        let mut ctx = context();
        let now = Instant::now();
        assert!(task.tick(&mut ctx, now).is_some());
        cancel.cancel();
        assert!(task.tick(&mut ctx, now).is_none());
        assert_eq!(task.frames(), 1);
    }

    #[test]
    fn tick_publishes_committed_swap_and_progress() {
        let t0 = Instant::now();
        let mut task = RenderTask::new(0.1, CancellationToken::new());
        let mut ctx = context();
        assert_eq!(ctx.pointer_moved(10.0, 205.0, t0), Some(0));

        let first = task.tick(&mut ctx, t0).expect("frame");
        assert_eq!(
            first.commits,
            vec![Commit {
                link: 0,
                start_index: 0,
                end_index: 0
            }]
        );
        assert_eq!(first.blend.progress, 0.0);

        let t1 = t0 + std::time::Duration::from_millis(500);
        assert_eq!(ctx.pointer_moved(60.0, 205.0, t1), Some(1));
        let second = task.tick(&mut ctx, t1).expect("frame");
        assert_eq!(
            second.commits,
            vec![Commit {
                link: 1,
                start_index: 0,
                end_index: 1
            }]
        );
        assert_eq!((second.blend.start_index, second.blend.end_index), (0, 1));
        assert_eq!(second.blend.progress, 0.0, "newest transition owns progress");

        let done = task
            .tick(&mut ctx, t1 + std::time::Duration::from_secs(2))
            .expect("frame");
        assert!(done.commits.is_empty());
        assert_eq!((done.blend.start_index, done.blend.end_index), (0, 1));
        assert!((done.blend.progress - 4.0).abs() < 1e-5);
        assert!(ctx.sequencer().is_idle());
    }

    #[test]
    fn clock_advances_by_fixed_step() {
        let mut task = RenderTask::new(0.1, CancellationToken::new());
        let mut ctx = context();
        let now = Instant::now();
        let mut last = 0.0;
        for _ in 0..10 {
            last = task.tick(&mut ctx, now).map(|f| f.time).unwrap_or_default();
        }
        assert!((last - 1.0).abs() < 1e-4);
    }
}
