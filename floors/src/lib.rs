//! A headless core for pages built from "floors": independently typed, independently loaded
//! content blocks stacked in one scrolling list.
//!
//! For the async orchestration layer (load pipeline, prefetch scheduling, overlays), see the
//! `floors-runtime` crate.
//!
//! This crate holds the parts that don't need a runtime:
//! - the block data model ([`BlockDescriptor`] and its policies)
//! - a two-tier [`CacheStore`] with per-entry TTLs
//! - the [`FloorError`] taxonomy and a strategy-driven [`ErrorHandler`]
//! - the [`BlockRegistry`] mapping block types to renderers
//! - [`reconcile`]: minimal, deterministic list diffs
//! - the [`Prefetcher`] window and the [`StickyCoordinator`]
//!
//! It is UI-agnostic. A host list widget is expected to provide its layout through
//! [`ListViewport`] and receive updates through [`ListUpdateSink`]; [`BlockLayout`] is a
//! ready-made headless implementation of both.
#![forbid(unsafe_code)]

#[macro_use]
mod macros;

mod cache;
mod diff;
mod error;
mod exposure;
mod fenwick;
mod handler;
mod layout;
mod prefetch;
mod registry;
mod sticky;
mod types;


pub use cache::{
    CacheConfig, CacheEntry, CacheStats, CacheStore, CacheTier, DEFAULT_DISK_TTL_MS,
    DEFAULT_MEMORY_CAPACITY, DEFAULT_MEMORY_TTL_MS,
};
pub use diff::{
    BlockDelta, DiffOp, ListUpdateSink, PayloadPatch, apply, check_unique_ids, dispatch,
    reconcile,
};
pub use error::{
    BlockCreationErrorKind, CacheErrorKind, Cause, DataParseErrorKind, ErrorCategory, FloorError,
    LifecycleErrorKind, NetworkErrorKind, ResourceErrorKind,
};
pub use exposure::{ExposureEvent, ExposureTracker, visible_ratio};
pub use handler::{
    ErrorHandler, ErrorListener, ErrorPolicy, ListenerId, RecoveryAction, RetryPolicy, Strategy,
    UserNotifier,
};
pub use layout::{BlockLayout, ListViewport};
pub use prefetch::{
    DEFAULT_PRELOAD_DISTANCE, DEFAULT_SCHEDULE_DELAY_MS, PrefetchRequest, Prefetcher,
};
pub use registry::{
    Block, BlockConstructor, BlockFrame, BlockInstance, BlockRegistry, DEFAULT_POOL_CAPACITY,
    PayloadCheck, Surface, TypedBlock,
};
pub use sticky::{PinnedOverlay, StickyChange, StickyCoordinator};
pub use types::{
    BlockConfig, BlockDescriptor, BlockType, CUSTOM_TYPE_KEY, CachePolicy, Clock, ExposureConfig,
    LoadPolicy, Margins, Payload,
};
