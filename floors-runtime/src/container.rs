use floors::{BlockLayout, ListUpdateSink, ListViewport, PinnedOverlay};

/// Where the host should draw the sticky overlay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayPlacement {
    pub id: String,
    pub index: usize,
    /// `padding_top + offset`, in list coordinates.
    pub top: i64,
    pub height: u32,
}

impl OverlayPlacement {
    pub fn new(pinned: &PinnedOverlay, padding_top: u32) -> Self {
        Self {
            id: pinned.id.clone(),
            index: pinned.index,
            top: pinned.top(padding_top),
            height: pinned.height,
        }
    }
}

/// The host's virtualized list, as seen by the manager.
///
/// The manager reads layout through [`ListViewport`], pushes structural updates through
/// [`ListUpdateSink`] and positions the sticky overlay with `place_overlay`. An attached
/// container is expected to start empty; the manager inserts the current blocks on attach.
pub trait ListContainer: ListViewport + ListUpdateSink {
    /// `None` removes the overlay. Drawn above all other content.
    fn place_overlay(&mut self, overlay: Option<&OverlayPlacement>);
}

/// Headless layouts can host a manager directly; the overlay is the host's business.
impl ListContainer for BlockLayout {
    fn place_overlay(&mut self, _overlay: Option<&OverlayPlacement>) {}
}
