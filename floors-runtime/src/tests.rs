use crate::*;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use floors::*;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

type Scripted = Result<Option<Payload>, FloorError>;

/// An in-memory source. Blocks answer with their params plus `"loaded": true` unless a script
/// says otherwise.
#[derive(Default)]
struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    delays: Mutex<HashMap<String, u64>>,
    calls: Mutex<Vec<String>>,
    pages: Mutex<HashMap<String, Vec<BlockDescriptor>>>,
    saved: Mutex<Vec<(String, Vec<BlockDescriptor>)>>,
}

impl ScriptedSource {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self, id: &str, results: Vec<Scripted>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(id.to_owned(), results.into());
    }

    fn delay(&self, id: &str, ms: u64) {
        self.delays.lock().unwrap().insert(id.to_owned(), ms);
    }

    fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == id).count()
    }
}

#[async_trait]
impl RemoteDataSource for ScriptedSource {
    async fn load_page_config(
        &self,
        page_id: &str,
    ) -> Result<Option<Vec<BlockDescriptor>>, FloorError> {
        Ok(self.pages.lock().unwrap().get(page_id).cloned())
    }

    async fn load_block_payload(
        &self,
        block_id: &str,
        _block_type: BlockType,
        params: &Payload,
    ) -> Result<Option<Payload>, FloorError> {
        self.calls.lock().unwrap().push(block_id.to_owned());
        let delay = self.delays.lock().unwrap().get(block_id).copied();
        if let Some(ms) = delay {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(block_id)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(result) => result,
            None => {
                let mut payload = params.clone();
                payload.insert("loaded".into(), json!(true));
                Ok(Some(payload))
            }
        }
    }

    async fn update_page_config(
        &self,
        page_id: &str,
        descriptors: &[BlockDescriptor],
    ) -> Result<bool, FloorError> {
        self.saved
            .lock()
            .unwrap()
            .push((page_id.to_owned(), descriptors.to_vec()));
        Ok(true)
    }
}

type Log = Arc<Mutex<Vec<String>>>;

/// A headless list that records every notification it receives.
struct RecordingList {
    layout: BlockLayout,
    log: Log,
}

impl RecordingList {
    fn new(viewport: u32) -> (Self, Log) {
        let log = Log::default();
        let list = Self {
            layout: BlockLayout::new(Vec::new(), viewport).with_estimate(100),
            log: Arc::clone(&log),
        };
        (list, log)
    }

    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl ListViewport for RecordingList {
    fn item_count(&self) -> usize {
        self.layout.item_count()
    }

    fn first_visible_index(&self) -> Option<usize> {
        self.layout.first_visible_index()
    }

    fn last_visible_index(&self) -> Option<usize> {
        self.layout.last_visible_index()
    }

    fn item_top(&self, index: usize) -> Option<i64> {
        self.layout.item_top(index)
    }

    fn item_height(&self, index: usize) -> Option<u32> {
        self.layout.item_height(index)
    }

    fn viewport_height(&self) -> u32 {
        self.layout.viewport_height()
    }
}

impl ListUpdateSink for RecordingList {
    fn on_inserted(&mut self, index: usize) {
        self.push(format!("insert {index}"));
        self.layout.on_inserted(index);
    }

    fn on_removed(&mut self, index: usize) {
        self.push(format!("remove {index}"));
        self.layout.on_removed(index);
    }

    fn on_moved(&mut self, from: usize, to: usize) {
        self.push(format!("move {from}->{to}"));
        self.layout.on_moved(from, to);
    }

    fn on_changed(&mut self, index: usize, _delta: Option<&BlockDelta>) {
        self.push(format!("change {index}"));
    }
}

impl ListContainer for RecordingList {
    fn place_overlay(&mut self, overlay: Option<&OverlayPlacement>) {
        match overlay {
            Some(o) => self.push(format!("overlay {}@{}", o.id, o.top)),
            None => self.push("overlay none".to_owned()),
        }
    }
}

#[derive(Default)]
struct RecordingSurface {
    frames: Vec<String>,
}

impl Surface for RecordingSurface {
    fn show(&mut self, frame: BlockFrame<'_>) {
        let s = match frame {
            BlockFrame::Loading => "loading".to_owned(),
            BlockFrame::Content {
                id,
                position,
                payload,
            } => match payload.get("title").and_then(Value::as_str) {
                Some(title) => format!("content:{id}@{position}:{title}"),
                None => format!("content:{id}@{position}"),
            },
            BlockFrame::Error { .. } => "error".to_owned(),
            BlockFrame::Placeholder { block_type } => format!("placeholder:{block_type}"),
        };
        self.frames.push(s);
    }
}

fn registry() -> BlockRegistry {
    let mut registry = BlockRegistry::new();
    for t in [BlockType::Text, BlockType::Banner, BlockType::Header] {
        registry.register(t, TypedBlock::<Value>::constructor());
    }
    registry
}

#[derive(serde::Deserialize)]
struct Titled {
    #[allow(dead_code)]
    title: String,
}

fn manager_with(
    source: Arc<ScriptedSource>,
    cache: Arc<CacheStore>,
    options: ManagerOptions,
) -> FloorManager<RecordingList> {
    init_tracing();
    FloorManager::new(source, registry(), cache, options)
}

fn manager(source: &Arc<ScriptedSource>) -> FloorManager<RecordingList> {
    manager_with(
        Arc::clone(source),
        Arc::new(CacheStore::default()),
        ManagerOptions::default(),
    )
}

fn block(id: &str, policy: LoadPolicy) -> BlockDescriptor {
    BlockDescriptor::new(id, BlockType::Text)
        .with_load_policy(policy)
        .with_field("title", id)
}

fn take(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}

fn timeout() -> FloorError {
    FloorError::network(NetworkErrorKind::Timeout, "timed out")
}

fn scroll(m: &mut FloorManager<RecordingList>, offset: u64) {
    if let Some(list) = m.container_mut() {
        list.layout.scroll_to(offset);
    }
    m.on_scroll().unwrap();
}

#[tokio::test(start_paused = true)]
async fn eager_blocks_load_before_the_list_updates() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    let (list, log) = RecordingList::new(100);
    m.attach(list).unwrap();

    m.load(vec![
        block("a", LoadPolicy::Eager),
        block("b", LoadPolicy::Lazy),
        block("c", LoadPolicy::Preload),
    ])
    .await
    .unwrap();

    assert_eq!(m.block_state("a"), Some(BlockState::Ready));
    assert_eq!(m.payload("a").and_then(|p| p.get("loaded")), Some(&json!(true)));
    assert_eq!(m.block_state("b"), Some(BlockState::Pending));
    // c is in the prefetch window below the viewport
    assert_eq!(m.block_state("c"), Some(BlockState::Loading));
    assert_eq!(take(&log), vec!["insert 0", "insert 1", "insert 2"]);

    m.settle().await.unwrap();
    assert_eq!(m.block_state("c"), Some(BlockState::Ready));
    assert_eq!(m.block_state("b"), Some(BlockState::Pending));
    assert_eq!(source.calls("b"), 0);
    assert_eq!(take(&log), vec!["change 2"]);
    assert!(m.cache().contains("floor:text:a", CachePolicy::Memory));
}

#[tokio::test(start_paused = true)]
async fn lazy_block_loads_once_on_screen() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    let (list, _log) = RecordingList::new(100);
    m.attach(list).unwrap();
    m.load(vec![
        block("a", LoadPolicy::Eager),
        block("b", LoadPolicy::Lazy),
        block("c", LoadPolicy::Preload),
    ])
    .await
    .unwrap();
    m.settle().await.unwrap();

    scroll(&mut m, 100);
    assert_eq!(m.block_state("b"), Some(BlockState::Loading));
    m.settle().await.unwrap();
    assert_eq!(m.block_state("b"), Some(BlockState::Ready));

    scroll(&mut m, 100);
    assert_eq!(m.in_flight(), 0);
    assert_eq!(source.calls("b"), 1);
}

#[tokio::test(start_paused = true)]
async fn prefetch_window_follows_scroll() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    let (list, _log) = RecordingList::new(200);
    m.attach(list).unwrap();
    let blocks: Vec<BlockDescriptor> = (0..10)
        .map(|i| block(&format!("p{i}"), LoadPolicy::Preload))
        .collect();
    m.load(blocks).await.unwrap();

    // p0 and p1 on screen, p2..=p4 in the window
    assert_eq!(m.in_flight(), 5);
    m.settle().await.unwrap();
    for i in 0..10 {
        assert_eq!(source.calls(&format!("p{i}")), usize::from(i < 5), "p{i}");
    }

    scroll(&mut m, 300);
    m.settle().await.unwrap();
    for i in 5..8 {
        assert_eq!(m.block_state(&format!("p{i}")), Some(BlockState::Ready));
    }
    assert_eq!(m.block_state("p8"), Some(BlockState::Pending));

    scroll(&mut m, 300);
    assert_eq!(m.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn prefetch_waits_for_its_delay() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    let (list, _log) = RecordingList::new(100);
    m.attach(list).unwrap();
    m.load(vec![block("a", LoadPolicy::Eager), block("b", LoadPolicy::Preload)])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(DEFAULT_SCHEDULE_DELAY_MS - 1)).await;
    assert_eq!(source.calls("b"), 0);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(source.calls("b"), 1);
    assert_eq!(m.process_events(), 1);
    assert_eq!(m.block_state("b"), Some(BlockState::Ready));
}

#[tokio::test(start_paused = true)]
async fn preload_starts_right_away_without_a_container() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    m.load(vec![
        block("x", LoadPolicy::Preload),
        block("y", LoadPolicy::Preload),
        block("z", LoadPolicy::Lazy),
    ])
    .await
    .unwrap();
    assert_eq!(m.in_flight(), 2);
    m.settle().await.unwrap();
    assert_eq!(m.block_state("x"), Some(BlockState::Ready));
    assert_eq!(m.block_state("y"), Some(BlockState::Ready));
    assert_eq!(m.block_state("z"), Some(BlockState::Pending));
}

#[tokio::test(start_paused = true)]
async fn bind_renders_loading_content_and_placeholders() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    let surfaced = Arc::new(Mutex::new(Vec::new()));
    m.set_error_callback({
        let surfaced = Arc::clone(&surfaced);
        move |e: &FloorError| surfaced.lock().unwrap().push(e.code().to_owned())
    });

    m.load(vec![
        block("a", LoadPolicy::Eager),
        block("b", LoadPolicy::Lazy),
        BlockDescriptor::new("v", BlockType::Video),
        block("h", LoadPolicy::Eager).with_visible(false),
    ])
    .await
    .unwrap();
    assert_eq!(m.block_state("h"), Some(BlockState::Pending));

    let mut surface = RecordingSurface::default();
    m.bind(0, &mut surface).unwrap();
    m.bind(1, &mut surface).unwrap();
    assert_eq!(m.block_state("b"), Some(BlockState::Loading));
    m.settle().await.unwrap();
    m.bind(1, &mut surface).unwrap();
    m.bind(2, &mut surface).unwrap();
    m.bind(3, &mut surface).unwrap();

    assert_eq!(
        surface.frames,
        vec![
            "content:a@0:a",
            "loading",
            "content:b@1:b",
            "placeholder:video",
            "placeholder:text",
        ]
    );
    assert_eq!(m.error_handler().error_count("BLOCK_TYPE_NOT_REGISTERED"), 1);
    assert_eq!(*surfaced.lock().unwrap(), vec!["BLOCK_TYPE_NOT_REGISTERED"]);

    let err = m.bind(9, &mut surface).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::DataParse);
}

#[tokio::test(start_paused = true)]
async fn network_errors_retry_with_backoff() {
    let source = ScriptedSource::new();
    source.script(
        "a",
        vec![
            Err(timeout()),
            Err(timeout()),
            Ok(Some(json!({"title": "third"}).as_object().cloned().unwrap())),
        ],
    );
    let mut m = manager(&source);

    let start = tokio::time::Instant::now();
    m.load(vec![block("a", LoadPolicy::Eager)]).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(200 + 400));

    assert_eq!(source.calls("a"), 3);
    assert_eq!(
        m.payload("a").and_then(|p| p.get("title")),
        Some(&json!("third"))
    );
    assert_eq!(m.error_handler().total_errors(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_falls_back_to_cache() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    m.load(vec![block("a", LoadPolicy::Eager), block("b", LoadPolicy::Eager)])
        .await
        .unwrap();

    source.script("a", vec![Err(timeout()), Err(timeout()), Err(timeout())]);
    source.script(
        "b",
        vec![Err(FloorError::data_parse(
            DataParseErrorKind::Malformed,
            "bad json",
        ))],
    );
    m.refresh().await.unwrap();

    assert_eq!(source.calls("a"), 4);
    assert_eq!(source.calls("b"), 2);
    for id in ["a", "b"] {
        assert_eq!(m.block_state(id), Some(BlockState::Ready));
        assert_eq!(m.data_origin(id), Some(DataOrigin::Fallback));
        assert_eq!(m.payload(id).and_then(|p| p.get("loaded")), Some(&json!(true)));
    }
    assert_eq!(m.error_handler().error_count("NETWORK_TIMEOUT"), 1);
    assert_eq!(m.error_handler().error_count("PARSE_MALFORMED"), 1);
}

#[tokio::test(start_paused = true)]
async fn unhandled_failures_reach_the_error_callback() {
    let source = ScriptedSource::new();
    let server = || FloorError::network(NetworkErrorKind::Server, "503");
    source.script("a", vec![Err(server()), Err(server()), Err(server())]);
    let mut m = manager(&source);
    let surfaced = Arc::new(Mutex::new(Vec::new()));
    m.set_error_callback({
        let surfaced = Arc::clone(&surfaced);
        move |e: &FloorError| surfaced.lock().unwrap().push(e.code().to_owned())
    });

    let a = block("a", LoadPolicy::Eager).with_cache_policy(CachePolicy::None);
    m.load(vec![a]).await.unwrap();

    assert_eq!(m.block_state("a"), Some(BlockState::Failed));
    assert_eq!(
        m.block_error("a").map(|e| e.code()),
        Some("NETWORK_SERVER_ERROR")
    );
    assert_eq!(*surfaced.lock().unwrap(), vec!["NETWORK_SERVER_ERROR"]);

    let mut surface = RecordingSurface::default();
    m.bind(0, &mut surface).unwrap();
    assert_eq!(surface.frames, vec!["error"]);
}

#[tokio::test(start_paused = true)]
async fn registered_recovery_keeps_errors_local() {
    let source = ScriptedSource::new();
    let server = || FloorError::network(NetworkErrorKind::Server, "503");
    source.script("a", vec![Err(server()), Err(server()), Err(server())]);
    let mut m = manager(&source);
    m.error_handler()
        .register_recovery("NETWORK_SERVER_ERROR", |_| true);
    let surfaced = Arc::new(AtomicUsize::new(0));
    m.set_error_callback({
        let surfaced = Arc::clone(&surfaced);
        move |_: &FloorError| {
            surfaced.fetch_add(1, Ordering::Relaxed);
        }
    });

    m.load(vec![block("a", LoadPolicy::Eager).with_cache_policy(CachePolicy::None)])
        .await
        .unwrap();
    assert_eq!(m.block_state("a"), Some(BlockState::Failed));
    assert_eq!(surfaced.load(Ordering::Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn list_mutations_send_minimal_updates() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    let (list, log) = RecordingList::new(1000);
    m.attach(list).unwrap();
    m.load(vec![
        block("a", LoadPolicy::Eager),
        block("b", LoadPolicy::Eager),
        block("c", LoadPolicy::Eager),
    ])
    .await
    .unwrap();
    take(&log);

    m.add(block("d", LoadPolicy::Eager), Some(1)).await.unwrap();
    assert_eq!(take(&log), vec!["insert 1"]);
    assert_eq!(m.block_state("d"), Some(BlockState::Ready));

    let removed = m.remove(0).await.unwrap();
    assert_eq!(removed.id, "a");
    assert_eq!(take(&log), vec!["remove 0"]);
    assert_eq!(m.block_state("a"), None);

    let ids: Vec<&str> = m.descriptors().iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["d", "b", "c"]);

    let b2 = block("b", LoadPolicy::Eager).with_field("title", "b2");
    m.update(1, b2).await.unwrap();
    assert_eq!(take(&log), vec!["change 1"]);
    assert_eq!(source.calls("b"), 2);
    assert_eq!(
        m.payload("b").and_then(|p| p.get("title")),
        Some(&json!("b2"))
    );

    // unchanged content is a no-op
    m.update(1, block("b", LoadPolicy::Eager).with_field("title", "b2"))
        .await
        .unwrap();
    assert!(take(&log).is_empty());

    assert!(m.update(7, block("z", LoadPolicy::Eager)).await.is_err());
    assert!(m.add(block("z", LoadPolicy::Eager), Some(9)).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn reload_reorders_with_moves() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    let (list, log) = RecordingList::new(1000);
    m.attach(list).unwrap();
    let blocks: Vec<BlockDescriptor> = ["a", "b", "c"]
        .iter()
        .map(|id| block(id, LoadPolicy::Eager))
        .collect();
    m.load(blocks.clone()).await.unwrap();
    take(&log);

    let rotated = vec![blocks[1].clone(), blocks[2].clone(), blocks[0].clone()];
    m.load(rotated).await.unwrap();
    assert_eq!(take(&log), vec!["move 0->2"]);
    // already loaded, nothing refetched
    assert_eq!(source.calls("a"), 1);
    assert_eq!(m.generation(), 2);
}

#[tokio::test(start_paused = true)]
async fn superseded_and_removed_loads_are_cancelled() {
    let source = ScriptedSource::new();
    source.delay("slow", 1_000);
    source.delay("late", 1_000);
    let mut m = manager(&source);

    m.load(vec![block("slow", LoadPolicy::Preload)]).await.unwrap();
    assert_eq!(m.in_flight(), 1);
    tokio::time::sleep(Duration::from_millis(10)).await;

    m.load(vec![block("other", LoadPolicy::Eager)]).await.unwrap();
    assert_eq!(m.in_flight(), 0);
    m.settle().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(m.process_events(), 0);
    assert!(!m.cache().contains("floor:text:slow", CachePolicy::Memory));
    assert_eq!(m.block_state("slow"), None);

    m.add(block("late", LoadPolicy::Preload), None).await.unwrap();
    assert_eq!(m.in_flight(), 1);
    m.remove(1).await.unwrap();
    assert_eq!(m.in_flight(), 0);
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert!(!m.cache().contains("floor:text:late", CachePolicy::Memory));
}

#[tokio::test(start_paused = true)]
async fn destroy_is_idempotent_and_fails_fast() {
    let source = ScriptedSource::new();
    source.delay("p", 1_000);
    let mut m = manager_with(
        Arc::clone(&source),
        Arc::new(CacheStore::default()),
        ManagerOptions::default().with_pooling(true),
    );
    let (list, log) = RecordingList::new(100);
    m.attach(list).unwrap();
    m.load(vec![block("a", LoadPolicy::Eager), block("p", LoadPolicy::Preload)])
        .await
        .unwrap();
    let mut surface = RecordingSurface::default();
    m.bind(0, &mut surface).unwrap();
    assert!(m.in_flight() > 0);

    m.destroy();
    m.destroy();
    assert!(m.is_destroyed());
    assert_eq!(m.in_flight(), 0);
    assert!(m.container().is_none());
    assert_eq!(m.registry().pooled_len(), 0);
    assert_eq!(take(&log).last().map(String::as_str), Some("overlay none"));

    let err = m.load(vec![block("b", LoadPolicy::Eager)]).await.unwrap_err();
    assert_eq!(err.code(), "LIFECYCLE_DESTROYED");
    assert!(!err.is_recoverable());
    assert!(m.bind(0, &mut surface).is_err());
    assert!(m.on_scroll().is_err());
    assert!(m.refresh().await.is_err());
    assert!(m.settle().await.is_err());

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert!(!m.cache().contains("floor:text:p", CachePolicy::Memory));
}

#[tokio::test(start_paused = true)]
async fn sticky_overlay_is_pushed_off_by_the_next_sticky_block() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    let (list, log) = RecordingList::new(200);
    m.attach(list).unwrap();
    m.load(vec![
        block("A", LoadPolicy::Eager).with_sticky(true).with_priority(1),
        block("B", LoadPolicy::Lazy),
        block("C", LoadPolicy::Eager).with_sticky(true).with_priority(2),
        block("D", LoadPolicy::Eager),
    ])
    .await
    .unwrap();
    assert_eq!(m.pinned().map(|p| p.id.as_str()), Some("A"));
    if let Some(list) = m.container_mut() {
        for (i, h) in [50, 100, 80, 400].into_iter().enumerate() {
            list.layout.measure(i, h);
        }
    }
    take(&log);

    scroll(&mut m, 60);
    let pinned = m.pinned().cloned().unwrap();
    assert_eq!((pinned.id.as_str(), pinned.offset), ("A", 0));

    scroll(&mut m, 120);
    let pinned = m.pinned().cloned().unwrap();
    assert_eq!((pinned.id.as_str(), pinned.offset), ("A", 30 - 50));
    let mut surface = RecordingSurface::default();
    assert!(m.render_overlay(&mut surface).unwrap());

    scroll(&mut m, 150);
    assert_eq!(m.pinned().map(|p| p.id.as_str()), Some("C"));
    assert!(m.render_overlay(&mut surface).unwrap());
    assert_eq!(surface.frames, vec!["content:A@0:A", "content:C@2:C"]);

    let overlays: Vec<String> = take(&log)
        .into_iter()
        .filter(|e| e.starts_with("overlay"))
        .collect();
    assert_eq!(overlays, vec!["overlay A@0", "overlay A@-20", "overlay C@0"]);

    m.configure(FloorFeatures {
        sticky: false,
        ..FloorFeatures::default()
    })
    .unwrap();
    assert!(m.pinned().is_none());
    assert!(!m.render_overlay(&mut surface).unwrap());
    assert_eq!(take(&log), vec!["overlay none"]);
}

#[tokio::test(start_paused = true)]
async fn updating_the_pinned_block_rebuilds_its_overlay() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    m.registry_mut().register(BlockType::Banner, move |d: &BlockDescriptor| {
        counter.fetch_add(1, Ordering::SeqCst);
        TypedBlock::<Value>::constructor()(d)
    });
    let (list, _log) = RecordingList::new(200);
    m.attach(list).unwrap();
    m.load(vec![
        block("A", LoadPolicy::Eager).with_sticky(true),
        block("B", LoadPolicy::Eager),
    ])
    .await
    .unwrap();
    assert_eq!(m.pinned().map(|p| p.id.as_str()), Some("A"));

    let banner = BlockDescriptor::new("A", BlockType::Banner)
        .with_load_policy(LoadPolicy::Eager)
        .with_sticky(true)
        .with_field("title", "A2");
    m.update(0, banner).await.unwrap();

    assert_eq!(m.pinned().map(|p| p.id.as_str()), Some("A"));
    assert_eq!(built.load(Ordering::SeqCst), 1);
    let mut surface = RecordingSurface::default();
    assert!(m.render_overlay(&mut surface).unwrap());
    assert_eq!(surface.frames, vec!["content:A@0:A2"]);
}

#[tokio::test(start_paused = true)]
async fn unparseable_source_data_keeps_the_last_good_copy() {
    let source = ScriptedSource::new();
    let bad = json!({ "title": 5 }).as_object().cloned();
    source.script("b", vec![Ok(bad.clone())]);
    let mut m = manager(&source);
    m.registry_mut()
        .register(BlockType::Text, TypedBlock::<Titled>::constructor());
    let (list, _log) = RecordingList::new(100);
    m.attach(list).unwrap();
    m.load(vec![block("a", LoadPolicy::Eager), block("b", LoadPolicy::Eager)])
        .await
        .unwrap();
    assert_eq!(m.block_state("b"), Some(BlockState::Failed));
    assert!(!m.cache().contains("floor:text:b", CachePolicy::Memory));

    let mut surface = RecordingSurface::default();
    m.bind(0, &mut surface).unwrap();
    assert_eq!(surface.frames, vec!["content:a@0:a"]);

    source.script("a", vec![Ok(bad.clone())]);
    m.refresh().await.unwrap();
    assert_eq!(source.calls("a"), 2);
    assert_eq!(m.block_state("a"), Some(BlockState::Ready));
    assert_eq!(m.data_origin("a"), Some(DataOrigin::Fallback));
    assert_eq!(m.payload("a").and_then(|p| p.get("title")), Some(&json!("a")));
    let cached = m.cache().get("floor:text:a", CachePolicy::Memory);
    assert_eq!(cached.as_ref().and_then(|v| v.get("title")), Some(&json!("a")));
    assert_eq!(m.error_handler().error_count("PARSE_SCHEMA_MISMATCH"), 2);

    // A fresh instance for the same block is served from the cache, not the bad reply.
    source.script("a", vec![Ok(bad)]);
    let a = m.remove(0).await.unwrap();
    m.add(a, Some(0)).await.unwrap();
    surface.frames.clear();
    m.bind(0, &mut surface).unwrap();
    assert_eq!(surface.frames, vec!["content:a@0:a"]);
    assert_eq!(m.data_origin("a"), Some(DataOrigin::Cache));
    assert_eq!(source.calls("a"), 2);
}

#[tokio::test(start_paused = true)]
async fn shared_cache_serves_a_second_page() {
    let source = ScriptedSource::new();
    let cache = Arc::new(CacheStore::default());
    let mut first = manager_with(
        Arc::clone(&source),
        Arc::clone(&cache),
        ManagerOptions::default(),
    );
    first.load(vec![block("a", LoadPolicy::Eager)]).await.unwrap();
    assert_eq!(first.data_origin("a"), Some(DataOrigin::Source));

    let mut second = manager_with(Arc::clone(&source), cache, ManagerOptions::default());
    second.load(vec![block("a", LoadPolicy::Eager)]).await.unwrap();
    assert_eq!(second.data_origin("a"), Some(DataOrigin::Cache));
    assert_eq!(source.calls("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn disk_policy_writes_through_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new();
    let cache = Arc::new(CacheStore::new(
        CacheConfig::default().with_disk_dir(Some(dir.path())),
    ));
    let mut m = manager_with(Arc::clone(&source), Arc::clone(&cache), ManagerOptions::default());
    m.load(vec![
        block("a", LoadPolicy::Eager).with_cache_policy(CachePolicy::Both),
    ])
    .await
    .unwrap();

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    cache.clear(CacheTier::Memory);
    assert!(cache.contains("floor:text:a", CachePolicy::Disk));
}

#[tokio::test(start_paused = true)]
async fn pages_load_and_save_through_the_source() {
    let source = ScriptedSource::new();
    source.pages.lock().unwrap().insert(
        "home".to_owned(),
        vec![block("a", LoadPolicy::Eager), block("b", LoadPolicy::Lazy)],
    );
    let mut m = manager(&source);

    assert!(m.load_page("home").await.unwrap());
    assert_eq!(m.len(), 2);
    assert!(!m.load_page("missing").await.unwrap());
    assert_eq!(m.len(), 2);

    assert!(m.save_page("home").await.unwrap());
    let saved = source.saved.lock().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, "home");
    assert_eq!(saved[0].1.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn duplicate_ids_are_rejected() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    let err = m
        .load(vec![block("a", LoadPolicy::Eager), block("a", LoadPolicy::Lazy)])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PARSE_INVALID_VALUE");
    assert!(m.is_empty());
    assert_eq!(source.calls("a"), 0);
}

#[tokio::test(start_paused = true)]
async fn exposure_is_sampled_from_the_container() {
    let source = ScriptedSource::new();
    let mut m = manager(&source);
    let (list, _log) = RecordingList::new(200);
    m.attach(list).unwrap();
    let cfg = ExposureConfig {
        min_visible_ratio: 0.5,
        min_dwell_ms: 100,
    };
    m.load(vec![
        block("a", LoadPolicy::Eager).with_exposure(Some(cfg)),
        block("b", LoadPolicy::Eager),
    ])
    .await
    .unwrap();

    assert!(m.sample_exposure(0).unwrap().is_empty());
    let events = m.sample_exposure(100).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, "a");
    assert!(m.sample_exposure(500).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn options_load_from_json() {
    let options: ManagerOptions = serde_json::from_value(json!({
        "preload_distance": 5,
        "sticky": false,
        "error_policy": {"categories": {"network": "fail_fast"}}
    }))
    .unwrap();
    assert!(options.preloading);
    assert_eq!(options.preload_distance, 5);
    assert_eq!(options.prefetch_delay_ms, DEFAULT_SCHEDULE_DELAY_MS);
    assert!(!options.sticky);

    let source = ScriptedSource::new();
    source.script("a", vec![Err(timeout())]);
    let mut m = manager_with(source.clone(), Arc::new(CacheStore::default()), options);
    m.load(vec![block("a", LoadPolicy::Eager)]).await.unwrap();
    // fail-fast: no retries
    assert_eq!(source.calls("a"), 1);
    assert_eq!(m.block_state("a"), Some(BlockState::Failed));
}

#[tokio::test(start_paused = true)]
async fn retry_stops_on_non_retryable_errors_and_cancellation() {
    let policy = RetryPolicy::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();

    let result: Result<(), FloorError> = retry_with_backoff(
        &policy,
        &token,
        |_| false,
        |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err(timeout())
            }
        },
    )
    .await;
    assert_eq!(result.unwrap_err().code(), "NETWORK_TIMEOUT");
    assert_eq!(calls.load(Ordering::Relaxed), 1);

    let start = tokio::time::Instant::now();
    let result: Result<(), FloorError> = retry_with_backoff(
        &policy,
        &token,
        |_| true,
        |attempt| async move {
            if attempt < 10 {
                Err(timeout())
            } else {
                Ok(())
            }
        },
    )
    .await;
    assert!(result.is_err());
    assert!(start.elapsed() >= Duration::from_millis(600));

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
    });
    let result: Result<(), FloorError> =
        retry_with_backoff(&policy, &token, |_| true, |_| async { Err(timeout()) }).await;
    assert_eq!(result.unwrap_err().category(), ErrorCategory::Lifecycle);
}
