use crate::diff::{BlockDelta, ListUpdateSink};
use crate::fenwick::Fenwick;

/// Read-only view of the virtualized list's current layout.
///
/// Positions are in the list's content area: `item_top(i) == 0` means block `i` starts exactly at
/// the top edge below `padding_top`, negative values mean it is partly scrolled out.
pub trait ListViewport {
    fn item_count(&self) -> usize;

    /// The first block with any part inside the content area.
    fn first_visible_index(&self) -> Option<usize>;

    /// The last block with any part inside the content area.
    fn last_visible_index(&self) -> Option<usize>;

    /// Top edge of block `index`, or `None` when the list hasn't laid it out.
    fn item_top(&self, index: usize) -> Option<i64>;

    fn item_height(&self, index: usize) -> Option<u32>;

    /// Height of the content area (excluding `padding_top`).
    fn viewport_height(&self) -> u32;

    fn padding_top(&self) -> u32 {
        0
    }
}

/// A headless list layout over block heights.
///
/// Offsets map to indexes through Fenwick prefix sums, so scroll queries are `O(log n)`.
/// Structural list updates (see [`ListUpdateSink`]) keep the heights in step with the block list;
/// inserted blocks start at the estimated height until measured.
#[derive(Clone, Debug)]
pub struct BlockLayout {
    heights: Vec<u32>,
    sums: Fenwick,
    estimate: u32,
    padding_top: u32,
    viewport: u32,
    scroll: u64,
}

impl BlockLayout {
    pub fn new(heights: Vec<u32>, viewport: u32) -> Self {
        let sums = Fenwick::from_sizes(&heights);
        Self {
            heights,
            sums,
            estimate: 100,
            padding_top: 0,
            viewport,
            scroll: 0,
        }
    }

    /// A layout of `count` blocks at the same estimated height.
    pub fn uniform(count: usize, height: u32, viewport: u32) -> Self {
        Self::new(vec![height; count], viewport).with_estimate(height)
    }

    pub fn with_estimate(mut self, estimate: u32) -> Self {
        self.estimate = estimate;
        self
    }

    pub fn with_padding_top(mut self, padding_top: u32) -> Self {
        self.padding_top = padding_top;
        self
    }

    pub fn total_height(&self) -> u64 {
        self.sums.total()
    }

    pub fn scroll_offset(&self) -> u64 {
        self.scroll
    }

    pub fn max_scroll_offset(&self) -> u64 {
        self.total_height().saturating_sub(self.viewport as u64)
    }

    /// Scrolls to `offset`, clamped to the scrollable range. Returns the applied offset.
    pub fn scroll_to(&mut self, offset: u64) -> u64 {
        self.scroll = offset.min(self.max_scroll_offset());
        self.scroll
    }

    pub fn scroll_by(&mut self, delta: i64) -> u64 {
        self.scroll_to(self.scroll.saturating_add_signed(delta))
    }

    /// Scrolls so that block `index` starts at the top of the content area.
    pub fn scroll_to_index(&mut self, index: usize) -> u64 {
        self.scroll_to(self.item_start(index))
    }

    pub fn set_viewport_height(&mut self, viewport: u32) {
        self.viewport = viewport;
        self.scroll = self.scroll.min(self.max_scroll_offset());
    }

    /// Records the real height of a block.
    pub fn measure(&mut self, index: usize, height: u32) {
        let Some(cur) = self.heights.get_mut(index) else {
            return;
        };
        let delta = height as i64 - *cur as i64;
        *cur = height;
        self.sums.add(index, delta);
    }

    /// Content offset where block `index` starts.
    pub fn item_start(&self, index: usize) -> u64 {
        self.sums.prefix_sum(index)
    }

    fn index_at(&self, offset: u64) -> Option<usize> {
        let count = self.heights.len();
        if count == 0 || offset >= self.total_height() {
            return None;
        }
        Some(self.sums.lower_bound(offset).min(count - 1))
    }

    fn rebuild(&mut self) {
        self.sums = Fenwick::from_sizes(&self.heights);
        debug_assert_eq!(self.sums.len(), self.heights.len());
        self.scroll = self.scroll.min(self.max_scroll_offset());
    }
}

impl ListViewport for BlockLayout {
    fn item_count(&self) -> usize {
        self.heights.len()
    }

    fn first_visible_index(&self) -> Option<usize> {
        if self.viewport == 0 {
            return None;
        }
        self.index_at(self.scroll)
    }

    fn last_visible_index(&self) -> Option<usize> {
        if self.viewport == 0 {
            return None;
        }
        let first = self.index_at(self.scroll)?;
        let end = self
            .scroll
            .saturating_add(self.viewport as u64 - 1)
            .min(self.total_height().saturating_sub(1));
        Some(self.index_at(end).unwrap_or(first).max(first))
    }

    fn item_top(&self, index: usize) -> Option<i64> {
        if index >= self.heights.len() {
            return None;
        }
        Some(self.item_start(index) as i64 - self.scroll as i64)
    }

    fn item_height(&self, index: usize) -> Option<u32> {
        self.heights.get(index).copied()
    }

    fn viewport_height(&self) -> u32 {
        self.viewport
    }

    fn padding_top(&self) -> u32 {
        self.padding_top
    }
}

impl ListUpdateSink for BlockLayout {
    fn on_inserted(&mut self, index: usize) {
        let index = index.min(self.heights.len());
        self.heights.insert(index, self.estimate);
        self.rebuild();
    }

    fn on_removed(&mut self, index: usize) {
        if index < self.heights.len() {
            self.heights.remove(index);
            self.rebuild();
        }
    }

    fn on_moved(&mut self, from: usize, to: usize) {
        if from < self.heights.len() {
            let h = self.heights.remove(from);
            self.heights.insert(to.min(self.heights.len()), h);
            self.rebuild();
        }
    }

    fn on_changed(&mut self, _index: usize, _delta: Option<&BlockDelta>) {}
}
