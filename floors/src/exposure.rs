use std::collections::{HashMap, HashSet};

use crate::BlockDescriptor;
use crate::layout::ListViewport;

#[derive(Clone, Debug, PartialEq)]
pub struct ExposureEvent {
    pub id: String,
    pub index: usize,
    pub visible_ratio: f32,
    pub dwell_ms: u64,
}

/// Fires one exposure event per block once it has been visible enough, for long enough.
///
/// Driven by sampling: call [`ExposureTracker::sample`] from scroll events and a periodic timer.
/// A block that drops below its ratio threshold restarts its dwell timer.
#[derive(Clone, Debug, Default)]
pub struct ExposureTracker {
    since: HashMap<String, u64>,
    fired: HashSet<String>,
}

impl ExposureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(
        &mut self,
        viewport: &dyn ListViewport,
        descriptors: &[BlockDescriptor],
        now_ms: u64,
    ) -> Vec<ExposureEvent> {
        let mut events = Vec::new();
        let mut seen = HashSet::new();

        if let (Some(first), Some(last)) =
            (viewport.first_visible_index(), viewport.last_visible_index())
        {
            let end = last.saturating_add(1).min(descriptors.len());
            for (index, d) in descriptors.iter().enumerate().take(end).skip(first) {
                let Some(cfg) = d.exposure else {
                    continue;
                };
                if !d.visible || self.fired.contains(&d.id) {
                    continue;
                }
                let ratio = visible_ratio(viewport, index);
                if ratio < cfg.min_visible_ratio {
                    continue;
                }
                seen.insert(d.id.as_str());
                let start = *self.since.entry(d.id.clone()).or_insert(now_ms);
                let dwell_ms = now_ms.saturating_sub(start);
                if dwell_ms >= cfg.min_dwell_ms {
                    ftrace!(id = d.id.as_str(), ratio, dwell_ms, "exposure");
                    self.fired.insert(d.id.clone());
                    events.push(ExposureEvent {
                        id: d.id.clone(),
                        index,
                        visible_ratio: ratio,
                        dwell_ms,
                    });
                }
            }
        }

        self.since.retain(|id, _| seen.contains(id.as_str()));
        events
    }

    pub fn has_fired(&self, id: &str) -> bool {
        self.fired.contains(id)
    }

    /// Lets `id` fire again.
    pub fn forget(&mut self, id: &str) {
        self.fired.remove(id);
        self.since.remove(id);
    }

    pub fn reset(&mut self) {
        self.fired.clear();
        self.since.clear();
    }
}

/// Fraction of block `index` inside the content area.
pub fn visible_ratio(viewport: &dyn ListViewport, index: usize) -> f32 {
    let (Some(top), Some(height)) = (viewport.item_top(index), viewport.item_height(index)) else {
        return 0.0;
    };
    if height == 0 {
        return 0.0;
    }
    let bottom = top + height as i64;
    let visible = bottom.min(viewport.viewport_height() as i64) - top.max(0);
    (visible.max(0) as f32 / height as f32).clamp(0.0, 1.0)
}
