use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use floors::{
    BlockDescriptor, BlockFrame, BlockInstance, BlockRegistry, CacheStore, DataParseErrorKind,
    DiffOp, ErrorHandler, ExposureEvent, ExposureTracker, FloorError, LoadPolicy, Payload,
    PinnedOverlay, Prefetcher, ResourceErrorKind, StickyChange, StickyCoordinator, Strategy,
    Surface, check_unique_ids, dispatch, reconcile,
};
use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::mpsc;

use crate::container::{ListContainer, OverlayPlacement};
use crate::loader::{DataOrigin, LoadFailure, Loaded, Loader};
use crate::options::{FloorFeatures, ManagerOptions};
use crate::source::RemoteDataSource;
use crate::tasks::TaskGroup;

/// Receives errors no strategy could handle.
pub type ErrorCallback = Arc<dyn Fn(&FloorError) + Send + Sync>;

/// Load state of one block's data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockState {
    /// Not requested yet (Lazy blocks off screen, or invalidated by an update).
    #[default]
    Pending,
    Loading,
    Ready,
    Failed,
}

#[derive(Default)]
struct FloorState {
    status: BlockState,
    /// Last good data. Kept through failed refreshes.
    payload: Option<Payload>,
    origin: Option<DataOrigin>,
    error: Option<FloorError>,
    instance: Option<BlockInstance>,
}

impl FloorState {
    fn is_settled(&self) -> bool {
        matches!(self.status, BlockState::Ready | BlockState::Failed)
    }
}

struct LoadEvent {
    id: String,
    ticket: u64,
    result: Result<Loaded, LoadFailure>,
}

/// Orchestrates one page of floors.
///
/// Owns the block list and drives loads (policy per block, cache, retries), diffs list changes
/// into the attached [`ListContainer`], schedules prefetches on scroll, and keeps the sticky
/// overlay in step.
///
/// Mutating calls take `&mut self`, so two list updates can never interleave. Spawned loads report
/// back through a channel: call [`FloorManager::process_events`] from the UI loop (or
/// [`FloorManager::settle`] to wait). Calls that start loads must run inside a tokio runtime.
///
/// After [`FloorManager::destroy`] every call fails with a `Lifecycle` error.
pub struct FloorManager<C> {
    loader: Loader,
    registry: BlockRegistry,
    options: ManagerOptions,
    container: Option<C>,
    descriptors: Vec<BlockDescriptor>,
    states: HashMap<String, FloorState>,
    prefetcher: Prefetcher,
    sticky: StickyCoordinator,
    overlay: Option<BlockInstance>,
    exposure: ExposureTracker,
    tasks: TaskGroup,
    events_tx: mpsc::UnboundedSender<LoadEvent>,
    events_rx: mpsc::UnboundedReceiver<LoadEvent>,
    on_error: Option<ErrorCallback>,
    generation: u64,
    destroyed: bool,
}

impl<C: ListContainer> FloorManager<C> {
    pub fn new(
        source: Arc<dyn RemoteDataSource>,
        mut registry: BlockRegistry,
        cache: Arc<CacheStore>,
        options: ManagerOptions,
    ) -> Self {
        registry.set_pooling(options.pooling);
        let handler = Arc::new(ErrorHandler::with_policy(&options.error_policy));
        let prefetcher =
            Prefetcher::new(options.preload_distance).with_delay_ms(options.prefetch_delay_ms);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            loader: Loader {
                source,
                cache,
                handler,
            },
            registry,
            options,
            container: None,
            descriptors: Vec::new(),
            states: HashMap::new(),
            prefetcher,
            sticky: StickyCoordinator::new(),
            overlay: None,
            exposure: ExposureTracker::new(),
            tasks: TaskGroup::new(),
            events_tx,
            events_rx,
            on_error: None,
            generation: 0,
            destroyed: false,
        }
    }

    pub fn descriptors(&self) -> &[BlockDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.loader.cache
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.loader.handler
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BlockRegistry {
        &mut self.registry
    }

    pub fn container(&self) -> Option<&C> {
        self.container.as_ref()
    }

    /// For feeding scroll and measurement into the container; follow up with
    /// [`FloorManager::on_scroll`].
    pub fn container_mut(&mut self) -> Option<&mut C> {
        self.container.as_mut()
    }

    /// Bumped by every `load` and `refresh`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn block_state(&self, id: &str) -> Option<BlockState> {
        self.states.get(id).map(|s| s.status)
    }

    pub fn payload(&self, id: &str) -> Option<&Payload> {
        self.states.get(id)?.payload.as_ref()
    }

    /// Where the current data for `id` came from.
    pub fn data_origin(&self, id: &str) -> Option<DataOrigin> {
        self.states.get(id)?.origin
    }

    /// The last load error for `id`, if its latest load failed.
    pub fn block_error(&self, id: &str) -> Option<&FloorError> {
        self.states.get(id)?.error.as_ref()
    }

    pub fn pinned(&self) -> Option<&PinnedOverlay> {
        self.sticky.pinned()
    }

    pub fn set_error_callback(&mut self, callback: impl Fn(&FloorError) + Send + Sync + 'static) {
        self.on_error = Some(Arc::new(callback));
    }

    pub fn clear_error_callback(&mut self) {
        self.on_error = None;
    }

    /// Attaches the host list and inserts the current blocks into it.
    pub fn attach(&mut self, mut container: C) -> Result<(), FloorError> {
        self.ensure_alive()?;
        let ops = reconcile(&[], &self.descriptors);
        dispatch(&ops, &mut container);
        if let Some(mut old) = self.container.replace(container) {
            old.place_overlay(None);
        }
        rdebug!(blocks = self.descriptors.len(), "attached");
        self.refresh_viewport();
        Ok(())
    }

    /// Detaches and returns the host list.
    pub fn detach(&mut self) -> Option<C> {
        let mut container = self.container.take()?;
        container.place_overlay(None);
        self.sticky.clear();
        self.drop_overlay();
        Some(container)
    }

    pub fn configure(&mut self, features: FloorFeatures) -> Result<(), FloorError> {
        self.ensure_alive()?;
        if let Some(policy) = &features.error_policy {
            self.loader.handler.apply_policy(policy);
            self.options.error_policy = policy.clone();
        }
        self.options.preloading = features.preloading;
        self.options.sticky = features.sticky;
        rdebug!(
            preloading = features.preloading,
            sticky = features.sticky,
            "configured"
        );
        self.refresh_viewport();
        Ok(())
    }

    /// Replaces the block list.
    ///
    /// Eager blocks are loaded before the list changes; Preload blocks load in the background
    /// (through the prefetch window when a container is attached and preloading is on); Lazy
    /// blocks wait until they are on screen. Loads still running from a previous list are
    /// cancelled.
    pub async fn load(&mut self, descriptors: Vec<BlockDescriptor>) -> Result<(), FloorError> {
        self.ensure_alive()?;
        self.commit(descriptors, true).await
    }

    /// Fetches the page config for `page_id` and loads it. Returns `false` when the source has
    /// no such page; the current list is kept.
    pub async fn load_page(&mut self, page_id: &str) -> Result<bool, FloorError> {
        self.ensure_alive()?;
        let policy = self.loader.handler.retry_policy();
        let handler = Arc::clone(&self.loader.handler);
        let source = Arc::clone(&self.loader.source);
        let token = self.tasks.child_token();
        let fetched = crate::retry_with_backoff(
            &policy,
            &token,
            |e| handler.strategy_for(e) == Strategy::Retry,
            |_| source.load_page_config(page_id),
        )
        .await;

        match fetched {
            Ok(Some(descriptors)) => {
                rdebug!(page_id, blocks = descriptors.len(), "page config loaded");
                self.commit(descriptors, true).await?;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Pushes the current block list back to the source.
    pub async fn save_page(&mut self, page_id: &str) -> Result<bool, FloorError> {
        self.ensure_alive()?;
        let source = Arc::clone(&self.loader.source);
        match source.update_page_config(page_id, &self.descriptors).await {
            Ok(saved) => Ok(saved),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Inserts a block at `position` (default: the end).
    pub async fn add(
        &mut self,
        descriptor: BlockDescriptor,
        position: Option<usize>,
    ) -> Result<(), FloorError> {
        self.ensure_alive()?;
        let position = position.unwrap_or(self.descriptors.len());
        if position > self.descriptors.len() {
            return Err(self.out_of_range(position));
        }
        let mut next = self.descriptors.clone();
        next.insert(position, descriptor);
        self.commit(next, false).await
    }

    /// Removes the block at `position`, cancelling its load.
    pub async fn remove(&mut self, position: usize) -> Result<BlockDescriptor, FloorError> {
        self.ensure_alive()?;
        if position >= self.descriptors.len() {
            return Err(self.out_of_range(position));
        }
        let mut next = self.descriptors.clone();
        let removed = next.remove(position);
        self.commit(next, false).await?;
        Ok(removed)
    }

    /// Replaces the block at `position`. A changed payload or type reloads the block.
    pub async fn update(
        &mut self,
        position: usize,
        descriptor: BlockDescriptor,
    ) -> Result<(), FloorError> {
        self.ensure_alive()?;
        if position >= self.descriptors.len() {
            return Err(self.out_of_range(position));
        }
        let mut next = self.descriptors.clone();
        next[position] = descriptor;
        self.commit(next, false).await
    }

    /// Reloads every block that has been requested so far, bypassing cache reads.
    ///
    /// Eager blocks are awaited; the rest reload in the background. A block whose reload fails
    /// keeps its previous data.
    pub async fn refresh(&mut self) -> Result<(), FloorError> {
        self.ensure_alive()?;
        self.generation += 1;
        self.cancel_in_flight();
        rdebug!(generation = self.generation, "refresh");

        let mut eager = Vec::new();
        let mut background = Vec::new();
        for d in self.descriptors.iter().filter(|d| d.visible) {
            let settled = self.states.get(&d.id).is_some_and(FloorState::is_settled);
            if d.load_policy == LoadPolicy::Eager {
                eager.push(d.clone());
            } else if settled {
                background.push(d.clone());
            }
        }

        let token = self.tasks.child_token();
        let loader = self.loader.clone();
        let checks: Vec<_> = eager.iter().map(|d| self.registry.payload_check(d)).collect();
        let results = join_all(
            eager
                .iter()
                .zip(&checks)
                .map(|(d, check)| loader.load(d, check.as_ref(), &token, false)),
        )
        .await;
        for (d, result) in eager.iter().zip(results) {
            self.finish_load(&d.id, result, true);
        }
        for d in background {
            self.spawn_load(d, 0, false);
        }
        self.refresh_viewport();
        Ok(())
    }

    /// Binds row `position` into `surface`: the list widget's bind callback.
    ///
    /// Creates the block instance on first bind. Renders loading, content or error state, or a
    /// placeholder when the block is hidden or its type can't be built. Binding a block whose data
    /// was never requested (typically a Lazy one) starts its load.
    pub fn bind(&mut self, position: usize, surface: &mut dyn Surface) -> Result<(), FloorError> {
        self.ensure_alive()?;
        let Some(descriptor) = self.descriptors.get(position).cloned() else {
            return Err(self.out_of_range(position));
        };
        if !descriptor.visible {
            surface.show(BlockFrame::Placeholder {
                block_type: descriptor.block_type,
            });
            return Ok(());
        }

        if self.block_state(&descriptor.id) == Some(BlockState::Pending)
            && !self.tasks.is_running(&descriptor.id)
        {
            self.prefetcher.mark_scheduled(descriptor.id.clone());
            self.spawn_load(descriptor.clone(), 0, true);
        }

        let mut surfaced = None;
        let state = self.states.entry(descriptor.id.clone()).or_default();
        if state.instance.is_none() {
            match self.registry.try_create(&descriptor) {
                Ok(instance) => state.instance = Some(instance),
                Err(e) => {
                    rwarn!(id = descriptor.id.as_str(), code = e.code(), "block not created");
                    if !self.loader.handler.handle(&e) {
                        surfaced = Some(e);
                    }
                }
            }
        }

        match state.instance.as_mut() {
            None => surface.show(BlockFrame::Placeholder {
                block_type: descriptor.block_type,
            }),
            Some(instance) => {
                if let (Some(payload), false) = (&state.payload, instance.is_data_loaded()) {
                    if let Err(e) = instance.bind_payload(payload) {
                        if !self.loader.handler.handle(&e) {
                            surfaced = Some(e.clone());
                        }
                        state.status = BlockState::Failed;
                        state.error = Some(e);
                    }
                }
                match (&state.error, instance.is_data_loaded()) {
                    (Some(e), false) => instance.render_error(surface, &e.user_message()),
                    _ => instance.render(surface, position),
                }
            }
        }

        if let Some(e) = surfaced {
            self.surface(&e);
        }
        Ok(())
    }

    /// Draws the pinned sticky block, if any. Returns whether anything was drawn.
    pub fn render_overlay(&mut self, surface: &mut dyn Surface) -> Result<bool, FloorError> {
        self.ensure_alive()?;
        let Some(pinned) = self.sticky.pinned() else {
            return Ok(false);
        };
        let index = pinned.index;
        let Some(overlay) = self.overlay.as_mut() else {
            return Ok(false);
        };
        if !overlay.is_data_loaded() {
            if let Some(payload) = self.states.get(overlay.id()).and_then(|s| s.payload.as_ref()) {
                if let Err(e) = overlay.bind_payload(payload) {
                    rwarn!(id = overlay.id(), code = e.code(), "overlay bind failed");
                }
            }
        }
        overlay.render(surface, index);
        Ok(true)
    }

    /// Handles a scroll or layout change of the attached container: starts loads for blocks on
    /// screen and in the prefetch window, and recomputes the sticky overlay.
    pub fn on_scroll(&mut self) -> Result<(), FloorError> {
        self.ensure_alive()?;
        self.refresh_viewport();
        Ok(())
    }

    /// Exposure events for blocks that have been visible long enough.
    pub fn sample_exposure(&mut self, now_ms: u64) -> Result<Vec<ExposureEvent>, FloorError> {
        self.ensure_alive()?;
        let Some(container) = self.container.as_ref() else {
            return Ok(Vec::new());
        };
        Ok(self.exposure.sample(container, &self.descriptors, now_ms))
    }

    /// Applies finished background loads. Returns how many were applied.
    pub fn process_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.apply_event(event) {
                applied += 1;
            }
        }
        applied
    }

    /// Waits for all in-flight loads and applies them. Loads started while settling (none are,
    /// unless a callback scrolls) are waited for too.
    pub async fn settle(&mut self) -> Result<(), FloorError> {
        self.ensure_alive()?;
        while !self.tasks.is_empty() {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.apply_event(event);
        }
        self.process_events();
        Ok(())
    }

    /// Tears everything down: cancels all loads, detaches the container and destroys every block
    /// instance. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        rdebug!(blocks = self.descriptors.len(), in_flight = self.tasks.len(), "destroy");

        self.tasks.shutdown();
        if let Some(mut container) = self.container.take() {
            container.place_overlay(None);
        }
        self.drop_overlay();
        self.sticky.clear();
        for (_, state) in self.states.drain() {
            if let Some(instance) = state.instance {
                instance.destroy();
            }
        }
        self.registry.clear_pool();
        self.prefetcher.clear();
        self.exposure.reset();
        self.descriptors.clear();
        while self.events_rx.try_recv().is_ok() {}
    }

    fn ensure_alive(&self) -> Result<(), FloorError> {
        if self.destroyed {
            Err(FloorError::destroyed())
        } else {
            Ok(())
        }
    }

    fn out_of_range(&self, position: usize) -> FloorError {
        FloorError::data_parse(
            DataParseErrorKind::InvalidValue,
            format!(
                "position {position} out of range for {} blocks",
                self.descriptors.len()
            ),
        )
    }

    /// Runs `err` through the handler and surfaces it when unhandled.
    fn fail(&self, err: FloorError) -> FloorError {
        if !self.loader.handler.handle(&err) {
            self.surface(&err);
        }
        err
    }

    fn surface(&self, err: &FloorError) {
        rerror!(code = err.code(), message = err.message(), "unhandled error");
        if let Some(callback) = &self.on_error {
            callback(err);
        }
    }

    async fn commit(
        &mut self,
        next: Vec<BlockDescriptor>,
        supersede: bool,
    ) -> Result<(), FloorError> {
        if let Err(e) = check_unique_ids(&next) {
            return Err(self.fail(e));
        }

        let ops = reconcile(&self.descriptors, &next);
        if supersede {
            self.generation += 1;
            self.cancel_in_flight();
        }

        let mut inserted = HashSet::new();
        let mut invalidated = HashSet::new();
        for op in &ops {
            match op {
                DiffOp::Insert { id, .. } => {
                    inserted.insert(id.clone());
                }
                DiffOp::Change { id, delta, .. }
                    if delta.payload.is_some() || delta.block_type.is_some() =>
                {
                    invalidated.insert(id.clone());
                }
                DiffOp::Remove { id, .. } => {
                    self.tasks.cancel(id);
                }
                _ => {}
            }
        }
        for id in &invalidated {
            self.tasks.cancel(id);
        }
        let stale: Vec<String> = self
            .descriptors
            .iter()
            .chain(&next)
            .filter(|d| invalidated.contains(&d.id))
            .map(BlockDescriptor::cache_key)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        self.loader.invalidate(stale).await;

        let eager: Vec<BlockDescriptor> = next
            .iter()
            .filter(|d| d.visible && d.load_policy == LoadPolicy::Eager)
            .filter(|d| {
                inserted.contains(&d.id)
                    || invalidated.contains(&d.id)
                    || !self.states.get(&d.id).is_some_and(FloorState::is_settled)
            })
            .cloned()
            .collect();
        for d in &eager {
            self.tasks.cancel(&d.id);
        }
        let token = self.tasks.child_token();
        let loader = self.loader.clone();
        let checks: Vec<_> = eager.iter().map(|d| self.registry.payload_check(d)).collect();
        let results = join_all(
            eager
                .iter()
                .zip(&checks)
                .map(|(d, check)| loader.load(d, check.as_ref(), &token, true)),
        )
        .await;

        for op in &ops {
            match op {
                DiffOp::Remove { id, .. } => {
                    self.prefetcher.forget(id);
                    self.exposure.forget(id);
                    if let Some(instance) = self.states.remove(id).and_then(|s| s.instance) {
                        self.registry.recycle(instance);
                    }
                }
                DiffOp::Change { id, .. } if invalidated.contains(id) => {
                    self.prefetcher.forget(id);
                    if let Some(state) = self.states.get_mut(id) {
                        if let Some(instance) = state.instance.take() {
                            self.registry.recycle(instance);
                        }
                        *state = FloorState::default();
                    }
                }
                _ => {}
            }
        }
        self.descriptors = next;
        for d in &self.descriptors {
            self.states.entry(d.id.clone()).or_default();
        }
        if let Some(container) = self.container.as_mut() {
            dispatch(&ops, container);
        }
        let stale_overlay = self
            .overlay
            .as_ref()
            .map(|o| o.id().to_owned())
            .filter(|id| invalidated.contains(id));
        if let Some(id) = stale_overlay {
            rdebug!(id = id.as_str(), "rebuilding sticky overlay for changed block");
            self.drop_overlay();
            self.build_overlay(&id);
        }
        rdebug!(
            blocks = self.descriptors.len(),
            ops = ops.len(),
            eager = eager.len(),
            "list updated"
        );

        let rebound: HashSet<&str> = ops
            .iter()
            .filter(|op| matches!(op, DiffOp::Insert { .. } | DiffOp::Change { .. }))
            .map(DiffOp::id)
            .collect();
        for (d, result) in eager.iter().zip(results) {
            let notify = !rebound.contains(d.id.as_str());
            self.finish_load(&d.id, result, notify);
        }

        // Without a scrolling container the prefetch window never moves; start Preload
        // blocks right away.
        if !(self.options.preloading && self.container.is_some()) {
            let preload: Vec<BlockDescriptor> = self
                .descriptors
                .iter()
                .filter(|d| d.visible && d.load_policy == LoadPolicy::Preload)
                .filter(|d| self.block_state(&d.id) == Some(BlockState::Pending))
                .cloned()
                .collect();
            for d in preload {
                self.prefetcher.mark_scheduled(d.id.clone());
                self.spawn_load(d, 0, true);
            }
        }

        if self.options.preloading {
            self.prefetcher.prime(&self.descriptors);
        }
        self.refresh_viewport();
        Ok(())
    }

    fn cancel_in_flight(&mut self) {
        for id in self.tasks.cancel_all() {
            self.prefetcher.forget(&id);
            if let Some(state) = self.states.get_mut(&id) {
                if state.status == BlockState::Loading {
                    state.status = BlockState::Pending;
                }
            }
        }
    }

    fn spawn_load(&mut self, descriptor: BlockDescriptor, delay_ms: u64, use_cache: bool) {
        let loader = self.loader.clone();
        let check = self.registry.payload_check(&descriptor);
        let tx = self.events_tx.clone();
        let id = descriptor.id.clone();
        let spawned = self.tasks.spawn(&id, move |ticket, token| async move {
            if delay_ms > 0 {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
            }
            let load = AssertUnwindSafe(loader.load(&descriptor, check.as_ref(), &token, use_cache));
            let result = match load.catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(LoadFailure {
                    error: FloorError::resource(ResourceErrorKind::FetchFailed, "block load panicked")
                        .with_block(&descriptor),
                    handled: false,
                }),
            };
            if token.is_cancelled() {
                return;
            }
            let _ = tx.send(LoadEvent {
                id: descriptor.id,
                ticket,
                result,
            });
        });

        if spawned.is_some() {
            rtrace!(id = id.as_str(), delay_ms, "load scheduled");
            if let Some(state) = self.states.get_mut(&id) {
                state.status = BlockState::Loading;
            }
        } else {
            self.prefetcher.forget(&id);
        }
    }

    fn apply_event(&mut self, event: LoadEvent) -> bool {
        if !self.tasks.finish(&event.id, event.ticket) {
            rtrace!(id = event.id.as_str(), "dropping stale load result");
            return false;
        }
        self.finish_load(&event.id, event.result, true);
        true
    }

    fn finish_load(&mut self, id: &str, result: Result<Loaded, LoadFailure>, notify: bool) {
        let Some(index) = self.descriptors.iter().position(|d| d.id == id) else {
            return;
        };
        let Some(state) = self.states.get_mut(id) else {
            return;
        };

        let mut surfaced = None;
        match result {
            Ok(loaded) => {
                rtrace!(id, origin = ?loaded.origin, "load finished");
                let bound = match state.instance.as_mut() {
                    Some(instance) => instance.bind_payload(&loaded.payload),
                    None => Ok(()),
                };
                match bound {
                    Ok(()) => {
                        state.status = BlockState::Ready;
                        state.error = None;
                        state.payload = Some(loaded.payload);
                        state.origin = Some(loaded.origin);
                    }
                    Err(e) => {
                        rwarn!(id, code = e.code(), "bind failed");
                        if !self.loader.handler.handle(&e) {
                            surfaced = Some(e.clone());
                        }
                        // The last good payload stays in place.
                        match (state.instance.as_mut(), state.payload.as_ref()) {
                            (Some(instance), Some(previous)) => {
                                if let Err(e) = instance.bind_payload(previous) {
                                    rwarn!(id, code = e.code(), "rebind of previous data failed");
                                }
                                state.status = BlockState::Ready;
                                state.origin = Some(DataOrigin::Fallback);
                            }
                            _ => state.status = BlockState::Failed,
                        }
                        state.error = Some(e);
                    }
                }
            }
            Err(failure) => {
                rwarn!(id, code = failure.error.code(), "load failed");
                state.status = if state.payload.is_some() {
                    BlockState::Ready
                } else {
                    BlockState::Failed
                };
                if !failure.handled {
                    surfaced = Some(failure.error.clone());
                }
                state.error = Some(failure.error);
            }
        }

        if let Some(overlay) = self.overlay.as_mut().filter(|o| o.id() == id) {
            if let Some(payload) = state.payload.as_ref() {
                if let Err(e) = overlay.bind_payload(payload) {
                    rwarn!(id, code = e.code(), "overlay bind failed");
                }
            }
        }
        if notify {
            if let Some(container) = self.container.as_mut() {
                container.on_changed(index, None);
            }
        }
        if let Some(e) = surfaced {
            self.surface(&e);
        }
    }

    fn refresh_viewport(&mut self) {
        if self.destroyed {
            return;
        }
        let Some(container) = self.container.as_ref() else {
            return;
        };
        let states = &self.states;
        let is_loaded = |id: &str| {
            states
                .get(id)
                .is_some_and(|s| s.status != BlockState::Pending)
        };
        let mut requests = self
            .prefetcher
            .on_visible(container, &self.descriptors, is_loaded);
        if self.options.preloading {
            requests.extend(
                self.prefetcher
                    .on_scroll(container, &self.descriptors, is_loaded),
            );
        }

        for request in requests {
            if let Some(d) = self.descriptors.get(request.index).cloned() {
                self.spawn_load(d, request.delay_ms, true);
            }
        }
        self.refresh_sticky();
    }

    fn refresh_sticky(&mut self) {
        let Some(container) = self.container.as_ref() else {
            return;
        };
        if !self.options.sticky {
            if let StickyChange::Unpinned { .. } = self.sticky.clear() {
                self.drop_overlay();
                if let Some(container) = self.container.as_mut() {
                    container.place_overlay(None);
                }
            }
            return;
        }

        let before = self.sticky.pinned().cloned();
        let change = self.sticky.update(container, &self.descriptors);
        let padding_top = container.padding_top();
        match change {
            StickyChange::Pinned { previous, id } => {
                rdebug!(id = id.as_str(), ?previous, "sticky overlay pinned");
                self.drop_overlay();
                self.build_overlay(&id);
            }
            StickyChange::Unpinned { previous } => {
                rdebug!(previous = previous.as_str(), "sticky overlay unpinned");
                self.drop_overlay();
            }
            StickyChange::Unchanged => {}
        }

        let after = self.sticky.pinned().cloned();
        if before != after {
            let placement = after.as_ref().map(|p| OverlayPlacement::new(p, padding_top));
            if let Some(container) = self.container.as_mut() {
                container.place_overlay(placement.as_ref());
            }
        }
    }

    fn build_overlay(&mut self, id: &str) {
        let Some(descriptor) = self.descriptors.iter().find(|d| d.id == id) else {
            return;
        };
        let Some(mut instance) = self.registry.create(descriptor) else {
            rwarn!(id, "no renderer for sticky block");
            return;
        };
        if let Some(payload) = self.states.get(id).and_then(|s| s.payload.as_ref()) {
            if let Err(e) = instance.bind_payload(payload) {
                rwarn!(id, code = e.code(), "overlay bind failed");
            }
        }
        self.overlay = Some(instance);
    }

    fn drop_overlay(&mut self) {
        if let Some(instance) = self.overlay.take() {
            instance.destroy();
        }
    }
}

impl<C> Drop for FloorManager<C> {
    fn drop(&mut self) {
        if !self.destroyed {
            self.tasks.shutdown();
        }
    }
}

impl<C> std::fmt::Debug for FloorManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloorManager")
            .field("blocks", &self.descriptors.len())
            .field("in_flight", &self.tasks.len())
            .field("pinned", &self.sticky.pinned_id())
            .field("generation", &self.generation)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}
