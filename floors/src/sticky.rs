use crate::BlockDescriptor;
use crate::layout::ListViewport;

/// The block currently pinned above the list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinnedOverlay {
    pub id: String,
    pub index: usize,
    pub height: u32,
    /// `0`, or negative while the next sticky block pushes this one off.
    pub offset: i64,
}

impl PinnedOverlay {
    /// Where the overlay is drawn, in list coordinates.
    pub fn top(&self, padding_top: u32) -> i64 {
        padding_top as i64 + self.offset
    }
}

/// How the pinned block changed on the last update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StickyChange {
    /// Same block pinned (its offset may have moved).
    Unchanged,
    /// A different block is pinned; the old overlay must be torn down and a new one bound.
    Pinned {
        previous: Option<String>,
        id: String,
    },
    Unpinned {
        previous: String,
    },
}

/// Decides which sticky block is pinned for the current scroll position.
///
/// At most one block is pinned at a time, and it is always a block present in the list passed to
/// the latest [`StickyCoordinator::update`].
#[derive(Clone, Debug, Default)]
pub struct StickyCoordinator {
    pinned: Option<PinnedOverlay>,
}

impl StickyCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pinned(&self) -> Option<&PinnedOverlay> {
        self.pinned.as_ref()
    }

    pub fn pinned_id(&self) -> Option<&str> {
        self.pinned.as_ref().map(|p| p.id.as_str())
    }

    pub fn offset(&self) -> i64 {
        self.pinned.as_ref().map_or(0, |p| p.offset)
    }

    /// Recomputes the pinned block and its offset. Call on every scroll/layout event and after
    /// every list mutation.
    pub fn update(
        &mut self,
        viewport: &dyn ListViewport,
        descriptors: &[BlockDescriptor],
    ) -> StickyChange {
        let Some(index) = Self::candidate(viewport, descriptors) else {
            return self.clear();
        };
        let id = &descriptors[index].id;

        let change = match &self.pinned {
            Some(p) if p.id == *id => StickyChange::Unchanged,
            prev => {
                let previous = prev.as_ref().map(|p| p.id.clone());
                fdebug!(id = id.as_str(), ?previous, "sticky pin changed");
                StickyChange::Pinned {
                    previous,
                    id: id.clone(),
                }
            }
        };

        let height = match (&change, &self.pinned) {
            (StickyChange::Unchanged, Some(p)) => viewport.item_height(index).unwrap_or(p.height),
            _ => viewport.item_height(index).unwrap_or(0),
        };
        let offset = Self::push_offset(viewport, descriptors, index, height);
        self.pinned = Some(PinnedOverlay {
            id: id.clone(),
            index,
            height,
            offset,
        });
        change
    }

    /// Drops the pinned block, if any.
    pub fn clear(&mut self) -> StickyChange {
        match self.pinned.take() {
            Some(p) => StickyChange::Unpinned { previous: p.id },
            None => StickyChange::Unchanged,
        }
    }

    /// The sticky block that should be pinned: walking back from the first visible block, the
    /// first sticky block that has reached the top edge.
    ///
    /// The first visible block itself only counts once its top is at or above the edge; until
    /// then the previous sticky block stays pinned and is pushed off by it.
    pub fn candidate(viewport: &dyn ListViewport, descriptors: &[BlockDescriptor]) -> Option<usize> {
        let first = viewport.first_visible_index()?;
        if descriptors.is_empty() {
            return None;
        }
        let first = first.min(descriptors.len() - 1);
        (0..=first).rev().find(|&i| {
            let d = &descriptors[i];
            d.sticky
                && d.visible
                && (i < first || viewport.item_top(i).is_none_or(|top| top <= 0))
        })
    }

    fn push_offset(
        viewport: &dyn ListViewport,
        descriptors: &[BlockDescriptor],
        index: usize,
        height: u32,
    ) -> i64 {
        let next = descriptors
            .iter()
            .enumerate()
            .skip(index + 1)
            .find(|(_, d)| d.sticky && d.visible)
            .map(|(i, _)| i);
        let Some(top) = next.and_then(|i| viewport.item_top(i)) else {
            return 0;
        };
        let height = height as i64;
        if top < height {
            (top - height).max(-height)
        } else {
            0
        }
    }
}
