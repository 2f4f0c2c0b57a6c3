//! Hover-driven blend sequencing.
//!
//! A hover resets the blend progress and schedules a linear tween toward the
//! target progress. The index swap for that hover is committed when the tween
//! *starts* (its first scheduler advance), not when it completes. Older tweens
//! keep running unless the overlap policy says otherwise, so back-to-back hovers
//! can commit swaps faster than the visible crossfade finishes.

use std::time::{Duration, Instant};

use crate::config::{OverlapPolicy, TransitionConfig};

/// Number of image textures the blend shader can sample.
pub const TEXTURE_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendState {
    pub start_index: usize,
    pub end_index: usize,
    /// 0..1 is the visible crossfade; values up to the target hold the blended image.
    pub progress: f32,
}

impl BlendState {
    pub fn crossfade(&self) -> f32 {
        self.progress.clamp(0.0, 1.0)
    }
}

/// An index swap published into the blend state when a transition starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub link: usize,
    pub start_index: usize,
    pub end_index: usize,
}

#[derive(Debug, Clone)]
struct Tween {
    link: usize,
    from: f32,
    to: f32,
    created_at: Instant,
    duration: Duration,
    started: bool,
}

impl Tween {
    fn value_at(&self, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.created_at);
        let t = if self.duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
        };
        self.from + (self.to - self.from) * t
    }

    fn is_complete(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.duration
    }
}

pub struct TransitionSequencer {
    state: BlendState,
    pending_start: usize,
    image_count: usize,
    tweens: Vec<Tween>,
    duration: Duration,
    target: f32,
    policy: OverlapPolicy,
}

impl TransitionSequencer {
    pub fn new(image_count: usize, cfg: &TransitionConfig) -> Self {
        let (start, end) = cfg.initial_indices(image_count);
        Self {
            state: BlendState {
                start_index: start,
                end_index: end,
                progress: cfg.initial_progress,
            },
            pending_start: start,
            image_count,
            tweens: Vec::new(),
            duration: cfg.duration,
            target: cfg.target_progress,
            policy: cfg.on_overlap,
        }
    }

    pub fn state(&self) -> BlendState {
        self.state
    }

    /// Start index the next committed transition will publish.
    pub fn pending_start(&self) -> usize {
        self.pending_start
    }

    pub fn is_idle(&self) -> bool {
        self.tweens.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.tweens.len()
    }

    /// Pointer entered link `link`. Returns `false` when the link has no image.
    pub fn hover(&mut self, link: usize, now: Instant) -> bool {
        if link >= self.image_count {
            tracing::debug!(link, images = self.image_count, "hover ignored; no image for link");
            return false;
        }
        self.state.progress = 0.0;
        if self.policy == OverlapPolicy::Cancel && !self.tweens.is_empty() {
            tracing::debug!(cancelled = self.tweens.len(), "dropping superseded transitions");
            self.tweens.clear();
        }
        self.tweens.push(Tween {
            link,
            from: self.state.progress,
            to: self.target,
            created_at: now,
            duration: self.duration,
            started: false,
        });
        true
    }

    /// Advance all in-flight tweens to `now`, firing start commits in creation order.
    ///
    /// Every tween writes the progress; the newest one writes last and wins.
    pub fn advance(&mut self, now: Instant) -> Vec<Commit> {
        let mut commits = Vec::new();
        for tween in &mut self.tweens {
            if !tween.started {
                tween.started = true;
                self.state.end_index = tween.link;
                self.state.start_index = self.pending_start;
                self.pending_start = tween.link;
                let commit = Commit {
                    link: tween.link,
                    start_index: self.state.start_index,
                    end_index: self.state.end_index,
                };
                tracing::debug!(
                    link = commit.link,
                    start = commit.start_index,
                    end = commit.end_index,
                    "transition_start"
                );
                commits.push(commit);
            }
            self.state.progress = tween.value_at(now);
        }
        self.tweens.retain(|tween| !tween.is_complete(now));
        commits
    }
}
