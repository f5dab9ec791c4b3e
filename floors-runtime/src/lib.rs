//! Async orchestration for the `floors` crate.
//!
//! [`FloorManager`] owns one page of floors and wires the `floors` core together on tokio:
//!
//! - per-block load policy (Eager blocks are awaited, Preload blocks load in the background,
//!   Lazy blocks load once on screen)
//! - the load pipeline: cache, [`RemoteDataSource`] with [`retry_with_backoff`], cache fallback
//! - list diffs applied to the host's [`ListContainer`]
//! - scroll-driven prefetching and the sticky overlay
//! - a cancellable task group torn down by [`FloorManager::destroy`]
//!
//! Like the core, this crate is UI-agnostic: the host supplies the list widget and surfaces.
#![forbid(unsafe_code)]

#[macro_use]
mod macros;

mod container;
mod loader;
mod manager;
mod options;
mod retry;
mod source;
mod tasks;

#[cfg(test)]
mod tests;

pub use container::{ListContainer, OverlayPlacement};
pub use loader::DataOrigin;
pub use manager::{BlockState, ErrorCallback, FloorManager};
pub use options::{FloorFeatures, ManagerOptions};
pub use retry::retry_with_backoff;
pub use source::{EmbeddedSource, RemoteDataSource};
