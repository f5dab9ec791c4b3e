// Example: drive a FloorManager against a simulated list widget and a flaky source.
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use floors::{
    BlockDescriptor, BlockFrame, BlockLayout, BlockRegistry, BlockType, CacheStore, FloorError,
    ListViewport, LoadPolicy, NetworkErrorKind, Payload, Surface, TypedBlock,
};
use floors_runtime::{FloorManager, ManagerOptions, RemoteDataSource};
use serde_json::{Value, json};

/// Every third request times out; everything takes 30ms.
#[derive(Default)]
struct FlakySource {
    requests: AtomicU32,
}

#[async_trait]
impl RemoteDataSource for FlakySource {
    async fn load_page_config(
        &self,
        page_id: &str,
    ) -> Result<Option<Vec<BlockDescriptor>>, FloorError> {
        if page_id != "home" {
            return Ok(None);
        }
        let mut blocks = vec![
            BlockDescriptor::new("banner", BlockType::Banner).with_field("title", "Sale"),
            BlockDescriptor::new("section-1", BlockType::Header)
                .with_sticky(true)
                .with_field("title", "Picks"),
        ];
        for i in 0..12 {
            let policy = if i < 4 {
                LoadPolicy::Preload
            } else {
                LoadPolicy::Lazy
            };
            blocks.push(
                BlockDescriptor::new(format!("item-{i}"), BlockType::Text)
                    .with_load_policy(policy)
                    .with_field("title", format!("Item {i}")),
            );
        }
        Ok(Some(blocks))
    }

    async fn load_block_payload(
        &self,
        block_id: &str,
        _block_type: BlockType,
        params: &Payload,
    ) -> Result<Option<Payload>, FloorError> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 3 == 0 {
            return Err(FloorError::network(
                NetworkErrorKind::Timeout,
                format!("{block_id} timed out"),
            ));
        }
        let mut payload = params.clone();
        payload.insert("served".into(), json!(n));
        Ok(Some(payload))
    }

    async fn update_page_config(
        &self,
        _page_id: &str,
        _descriptors: &[BlockDescriptor],
    ) -> Result<bool, FloorError> {
        Ok(false)
    }
}

struct PrintSurface;

impl Surface for PrintSurface {
    fn show(&mut self, frame: BlockFrame<'_>) {
        match frame {
            BlockFrame::Content {
                id,
                position,
                payload,
            } => {
                let title = payload.get("title").and_then(Value::as_str).unwrap_or("");
                println!("  [{position}] {id}: {title}");
            }
            other => println!("  {other:?}"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), FloorError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut registry = BlockRegistry::new();
    for t in [BlockType::Banner, BlockType::Header, BlockType::Text] {
        registry.register(t, TypedBlock::<Value>::constructor());
    }

    let mut manager: FloorManager<BlockLayout> = FloorManager::new(
        Arc::new(FlakySource::default()),
        registry,
        Arc::new(CacheStore::default()),
        ManagerOptions::default().with_preload_distance(2),
    );
    manager.set_error_callback(|e| println!("error surfaced: {e}"));
    manager.attach(BlockLayout::new(Vec::new(), 300).with_estimate(80))?;

    if !manager.load_page("home").await? {
        println!("no such page");
        return Ok(());
    }
    println!("loaded {} blocks, {} loading", manager.len(), manager.in_flight());
    manager.settle().await?;

    for offset in [0, 400, 800] {
        if let Some(layout) = manager.container_mut() {
            layout.scroll_to(offset);
        }
        manager.on_scroll()?;
        manager.settle().await?;

        println!("scroll={offset} pinned={:?}", manager.pinned().map(|p| &p.id));
        let (Some(first), Some(last)) = manager
            .container()
            .map(|l| (l.first_visible_index(), l.last_visible_index()))
            .unwrap_or_default()
        else {
            continue;
        };
        for position in first..=last {
            manager.bind(position, &mut PrintSurface)?;
        }
        manager.render_overlay(&mut PrintSurface)?;
    }

    let counts = manager.error_handler().error_counts();
    println!("errors: {counts:?}");
    manager.destroy();
    Ok(())
}
