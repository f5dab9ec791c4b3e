//! Minimal, deterministic edit scripts between two block lists.
//!
//! Identity is the descriptor `id`. The script is built in four passes so that every operation's
//! indexes are valid when the ops are replayed in order against the old list:
//!
//! 1. `Remove` for ids missing from the new list, back to front.
//! 2. `Move` for surviving ids outside the longest run that already has the right relative
//!    order. Each moved id lands directly after its new predecessor, so the number of moves is
//!    exactly `common - LIS`, the minimum.
//! 3. `Insert` for new ids, front to back at their final index.
//! 4. `Change` at the final index for surviving ids whose content differs, carrying only the
//!    fields that changed.

use std::collections::{HashMap, HashSet};

use crate::{
    BlockConfig, BlockDescriptor, BlockType, CachePolicy, DataParseErrorKind, ExposureConfig,
    FloorError, LoadPolicy, Payload,
};

/// Field-level payload difference.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PayloadPatch {
    /// Keys added or whose value changed, with the new value.
    pub set: Payload,
    /// Keys present before and absent now.
    pub removed: Vec<String>,
}

impl PayloadPatch {
    pub fn between(old: &Payload, new: &Payload) -> Option<Self> {
        let mut patch = Self::default();
        for (k, v) in new {
            if old.get(k) != Some(v) {
                patch.set.insert(k.clone(), v.clone());
            }
        }
        for k in old.keys() {
            if !new.contains_key(k) {
                patch.removed.push(k.clone());
            }
        }
        (!patch.is_empty()).then_some(patch)
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.removed.is_empty()
    }

    pub fn apply(&self, target: &mut Payload) {
        for k in &self.removed {
            target.remove(k);
        }
        for (k, v) in &self.set {
            target.insert(k.clone(), v.clone());
        }
    }
}

/// The parts of a descriptor that changed while its id stayed the same.
///
/// Render layers can use this for partial rebinding: e.g. a payload-only delta doesn't need a
/// new layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockDelta {
    pub block_type: Option<BlockType>,
    pub config: Option<BlockConfig>,
    pub payload: Option<PayloadPatch>,
    pub visible: Option<bool>,
    pub sticky: Option<bool>,
    pub priority: Option<i32>,
    pub load_policy: Option<LoadPolicy>,
    pub cache_policy: Option<CachePolicy>,
    pub exposure: Option<Option<ExposureConfig>>,
}

fn changed<T: PartialEq + Clone>(old: &T, new: &T) -> Option<T> {
    (old != new).then(|| new.clone())
}

impl BlockDelta {
    pub fn between(old: &BlockDescriptor, new: &BlockDescriptor) -> Option<Self> {
        let delta = Self {
            block_type: changed(&old.block_type, &new.block_type),
            config: changed(&old.config, &new.config),
            payload: PayloadPatch::between(&old.payload, &new.payload),
            visible: changed(&old.visible, &new.visible),
            sticky: changed(&old.sticky, &new.sticky),
            priority: changed(&old.priority, &new.priority),
            load_policy: changed(&old.load_policy, &new.load_policy),
            cache_policy: changed(&old.cache_policy, &new.cache_policy),
            exposure: changed(&old.exposure, &new.exposure),
        };
        (!delta.is_empty()).then_some(delta)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when only the payload differs, so existing block instances can rebind in place.
    pub fn is_payload_only(&self) -> bool {
        self.payload.is_some()
            && Self {
                payload: None,
                ..self.clone()
            }
            .is_empty()
    }

    pub fn apply_to(&self, d: &mut BlockDescriptor) {
        if let Some(t) = self.block_type {
            d.block_type = t;
        }
        if let Some(c) = &self.config {
            d.config = c.clone();
        }
        if let Some(p) = &self.payload {
            p.apply(&mut d.payload);
        }
        if let Some(v) = self.visible {
            d.visible = v;
        }
        if let Some(s) = self.sticky {
            d.sticky = s;
        }
        if let Some(p) = self.priority {
            d.priority = p;
        }
        if let Some(p) = self.load_policy {
            d.load_policy = p;
        }
        if let Some(p) = self.cache_policy {
            d.cache_policy = p;
        }
        if let Some(e) = self.exposure {
            d.exposure = e;
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DiffOp {
    Remove { index: usize, id: String },
    /// Remove at `from`, then insert at `to` (indexes as seen at that step).
    Move { from: usize, to: usize, id: String },
    Insert { index: usize, id: String },
    Change { index: usize, id: String, delta: BlockDelta },
}

impl DiffOp {
    pub fn id(&self) -> &str {
        match self {
            Self::Remove { id, .. }
            | Self::Move { id, .. }
            | Self::Insert { id, .. }
            | Self::Change { id, .. } => id,
        }
    }
}

/// Receives list updates, mirroring a virtualized list's adapter notifications.
pub trait ListUpdateSink {
    fn on_inserted(&mut self, index: usize);
    fn on_removed(&mut self, index: usize);
    fn on_moved(&mut self, from: usize, to: usize);
    /// `delta == None` asks for a full rebind.
    fn on_changed(&mut self, index: usize, delta: Option<&BlockDelta>);
}

/// Rejects lists with duplicate ids; the diff relies on ids being unique.
pub fn check_unique_ids(list: &[BlockDescriptor]) -> Result<(), FloorError> {
    let mut seen = HashSet::with_capacity(list.len());
    for d in list {
        if !seen.insert(d.id.as_str()) {
            return Err(FloorError::data_parse(
                DataParseErrorKind::InvalidValue,
                format!("duplicate block id `{}`", d.id),
            )
            .with_block(d));
        }
    }
    Ok(())
}

/// Computes the edit script turning `old` into `new`. Both lists must have unique ids.
pub fn reconcile(old: &[BlockDescriptor], new: &[BlockDescriptor]) -> Vec<DiffOp> {
    debug_assert!(check_unique_ids(old).is_ok() && check_unique_ids(new).is_ok());

    let old_index: HashMap<&str, usize> =
        old.iter().enumerate().map(|(i, d)| (d.id.as_str(), i)).collect();
    let new_ids: HashSet<&str> = new.iter().map(|d| d.id.as_str()).collect();

    let mut ops = Vec::new();
    let mut work: Vec<&str> = old.iter().map(|d| d.id.as_str()).collect();

    for i in (0..old.len()).rev() {
        if !new_ids.contains(old[i].id.as_str()) {
            work.remove(i);
            ops.push(DiffOp::Remove {
                index: i,
                id: old[i].id.clone(),
            });
        }
    }

    let target: Vec<&str> = new
        .iter()
        .map(|d| d.id.as_str())
        .filter(|id| old_index.contains_key(id))
        .collect();
    let keep = stable_ids(&work, &target);

    for (k, &id) in target.iter().enumerate() {
        if keep.contains(id) {
            continue;
        }
        let Some(from) = position(&work, id) else {
            continue;
        };
        let to = match k {
            0 => 0,
            _ => match position(&work, target[k - 1]) {
                Some(q) if from < q => q,
                Some(q) => q + 1,
                None => continue,
            },
        };
        if from != to {
            let moved = work.remove(from);
            work.insert(to, moved);
            ops.push(DiffOp::Move {
                from,
                to,
                id: id.to_owned(),
            });
        }
    }

    for (j, d) in new.iter().enumerate() {
        if !old_index.contains_key(d.id.as_str()) {
            work.insert(j, d.id.as_str());
            ops.push(DiffOp::Insert {
                index: j,
                id: d.id.clone(),
            });
        }
    }
    debug_assert!(work.iter().copied().eq(new.iter().map(|d| d.id.as_str())));

    for (j, d) in new.iter().enumerate() {
        if let Some(&i) = old_index.get(d.id.as_str()) {
            if let Some(delta) = BlockDelta::between(&old[i], d) {
                ops.push(DiffOp::Change {
                    index: j,
                    id: d.id.clone(),
                    delta,
                });
            }
        }
    }

    ftrace!(
        old = old.len(),
        new = new.len(),
        ops = ops.len(),
        "reconcile"
    );
    ops
}

/// Forwards each op to a list widget's update callbacks.
pub fn dispatch(ops: &[DiffOp], sink: &mut dyn ListUpdateSink) {
    for op in ops {
        match op {
            DiffOp::Remove { index, .. } => sink.on_removed(*index),
            DiffOp::Move { from, to, .. } => sink.on_moved(*from, *to),
            DiffOp::Insert { index, .. } => sink.on_inserted(*index),
            DiffOp::Change { index, delta, .. } => sink.on_changed(*index, Some(delta)),
        }
    }
}

/// Replays `ops` against a list of per-block state.
///
/// `insert` builds state for a new id, `remove` disposes of removed state and `change` updates
/// state in place.
pub fn apply<T>(
    ops: &[DiffOp],
    items: &mut Vec<T>,
    mut insert: impl FnMut(usize, &str) -> T,
    mut remove: impl FnMut(T),
    mut change: impl FnMut(&mut T, &BlockDelta),
) {
    for op in ops {
        match op {
            DiffOp::Remove { index, .. } => {
                if *index < items.len() {
                    remove(items.remove(*index));
                }
            }
            DiffOp::Move { from, to, .. } => {
                if *from < items.len() {
                    let item = items.remove(*from);
                    items.insert((*to).min(items.len()), item);
                }
            }
            DiffOp::Insert { index, id } => {
                let item = insert(*index, id);
                items.insert((*index).min(items.len()), item);
            }
            DiffOp::Change { index, delta, .. } => {
                if let Some(item) = items.get_mut(*index) {
                    change(item, delta);
                }
            }
        }
    }
}

fn position(work: &[&str], id: &str) -> Option<usize> {
    work.iter().position(|w| *w == id)
}

/// Ids that can stay in place: the longest subsequence of `target` already ordered in `work`.
///
/// `work` and `target` hold the same ids, so the LCS is the longest increasing subsequence of
/// each target id's position in `work`.
fn stable_ids<'a>(work: &[&'a str], target: &[&'a str]) -> HashSet<&'a str> {
    let pos: HashMap<&str, usize> = work.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let seq: Vec<usize> = target.iter().filter_map(|id| pos.get(id).copied()).collect();

    // tails[l] = index into `seq` of the smallest tail of an increasing run of length l + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];
    for (i, &v) in seq.iter().enumerate() {
        let l = tails.partition_point(|&t| seq[t] < v);
        if l > 0 {
            prev[i] = Some(tails[l - 1]);
        }
        if l == tails.len() {
            tails.push(i);
        } else {
            tails[l] = i;
        }
    }

    let mut keep = HashSet::with_capacity(tails.len());
    let mut cur = tails.last().copied();
    while let Some(i) = cur {
        keep.insert(work[seq[i]]);
        cur = prev[i];
    }
    keep
}
