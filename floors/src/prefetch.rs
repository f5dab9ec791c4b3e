use std::collections::HashSet;
use std::ops::Range;

use crate::layout::ListViewport;
use crate::{BlockDescriptor, LoadPolicy};

pub const DEFAULT_PRELOAD_DISTANCE: usize = 3;
pub const DEFAULT_SCHEDULE_DELAY_MS: u64 = 50;

/// A block load the prefetcher wants started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefetchRequest {
    pub index: usize,
    pub id: String,
    /// How long to wait before starting the load; spreads work out during fast flings.
    pub delay_ms: u64,
}

/// Schedules loads for the blocks just below the viewport.
///
/// Ids are marked as soon as they're scheduled, so repeated scroll events at the same position
/// never schedule twice. Nothing here cancels a load: a block that scrolls out of the window
/// keeps loading and warms the cache for a later scroll back.
#[derive(Clone, Debug)]
pub struct Prefetcher {
    distance: usize,
    delay_ms: u64,
    scheduled: HashSet<String>,
}

impl Default for Prefetcher {
    fn default() -> Self {
        Self::new(DEFAULT_PRELOAD_DISTANCE)
    }
}

impl Prefetcher {
    pub fn new(distance: usize) -> Self {
        Self {
            distance,
            delay_ms: DEFAULT_SCHEDULE_DELAY_MS,
            scheduled: HashSet::new(),
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn distance(&self) -> usize {
        self.distance
    }

    pub fn set_distance(&mut self, distance: usize) {
        self.distance = distance;
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// `[last_visible + 1, last_visible + distance]`, clipped to `len`.
    pub fn window(last_visible: usize, distance: usize, len: usize) -> Range<usize> {
        let start = last_visible.saturating_add(1).min(len);
        let end = last_visible.saturating_add(distance).saturating_add(1).min(len);
        start..end.max(start)
    }

    /// Handles a scroll or layout event.
    ///
    /// `is_loaded` reports blocks whose data is already available; they are never scheduled.
    pub fn on_scroll(
        &mut self,
        viewport: &dyn ListViewport,
        descriptors: &[BlockDescriptor],
        is_loaded: impl Fn(&str) -> bool,
    ) -> Vec<PrefetchRequest> {
        let Some(last) = viewport.last_visible_index() else {
            return Vec::new();
        };
        self.schedule_window(last, descriptors, is_loaded)
    }

    /// Same as [`Self::on_scroll`] for a known last visible index.
    pub fn schedule_window(
        &mut self,
        last_visible: usize,
        descriptors: &[BlockDescriptor],
        is_loaded: impl Fn(&str) -> bool,
    ) -> Vec<PrefetchRequest> {
        let window = Self::window(last_visible, self.distance, descriptors.len());
        let mut out = Vec::new();
        for index in window {
            let d = &descriptors[index];
            if d.load_policy == LoadPolicy::Lazy || !d.visible || is_loaded(&d.id) {
                continue;
            }
            if !self.scheduled.insert(d.id.clone()) {
                continue;
            }
            out.push(PrefetchRequest {
                index,
                id: d.id.clone(),
                delay_ms: self.delay_ms,
            });
        }
        if !out.is_empty() {
            ftrace!(last_visible, scheduled = out.len(), "prefetch window");
        }
        out
    }

    /// Blocks currently on screen that still need a load, whatever their load policy. Lazy
    /// blocks rely on this as their only trigger. They are marked like prefetches and load
    /// without delay.
    pub fn on_visible(
        &mut self,
        viewport: &dyn ListViewport,
        descriptors: &[BlockDescriptor],
        is_loaded: impl Fn(&str) -> bool,
    ) -> Vec<PrefetchRequest> {
        let (Some(first), Some(last)) =
            (viewport.first_visible_index(), viewport.last_visible_index())
        else {
            return Vec::new();
        };
        let end = last.saturating_add(1).min(descriptors.len());
        let mut out = Vec::new();
        for (index, d) in descriptors.iter().enumerate().take(end).skip(first) {
            if !d.visible || is_loaded(&d.id) {
                continue;
            }
            if self.scheduled.insert(d.id.clone()) {
                out.push(PrefetchRequest {
                    index,
                    id: d.id.clone(),
                    delay_ms: 0,
                });
            }
        }
        out
    }

    /// Re-primes for a new list: forgets ids that are no longer present.
    pub fn prime(&mut self, descriptors: &[BlockDescriptor]) {
        let present: HashSet<&str> = descriptors.iter().map(|d| d.id.as_str()).collect();
        self.scheduled.retain(|id| present.contains(id.as_str()));
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.scheduled.contains(id)
    }

    pub fn mark_scheduled(&mut self, id: impl Into<String>) {
        self.scheduled.insert(id.into());
    }

    /// Allows `id` to be scheduled again, e.g. after its load failed.
    pub fn forget(&mut self, id: &str) {
        self.scheduled.remove(id);
    }

    pub fn clear(&mut self) {
        self.scheduled.clear();
    }
}
