use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The untyped business content of a block.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Payload key naming the registration used for [`BlockType::Custom`] blocks.
pub const CUSTOM_TYPE_KEY: &str = "custom_type";

/// Discriminant selecting a block's renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Banner,
    Carousel,
    Grid,
    List,
    Text,
    Image,
    Video,
    Header,
    Divider,
    Custom,
}

impl BlockType {
    pub const ALL: [BlockType; 10] = [
        Self::Banner,
        Self::Carousel,
        Self::Grid,
        Self::List,
        Self::Text,
        Self::Image,
        Self::Video,
        Self::Header,
        Self::Divider,
        Self::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Banner => "banner",
            Self::Carousel => "carousel",
            Self::Grid => "grid",
            Self::List => "list",
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Header => "header",
            Self::Divider => "divider",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockType {
    type Err = crate::FloorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                crate::FloorError::data_parse(
                    crate::DataParseErrorKind::InvalidValue,
                    format!("unknown block type `{s}`"),
                )
            })
    }
}

/// When a block's data is fetched relative to the list update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Loaded before the list update is applied.
    #[default]
    Eager,
    /// Loaded only once the block becomes visible.
    Lazy,
    /// Loaded in the background, ahead of visibility.
    Preload,
}

/// Which cache tiers a block's data may live in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    None,
    #[default]
    Memory,
    Disk,
    Both,
}

impl CachePolicy {
    pub fn uses_memory(self) -> bool {
        matches!(self, Self::Memory | Self::Both)
    }

    pub fn uses_disk(self) -> bool {
        matches!(self, Self::Disk | Self::Both)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Margins {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

/// Layout hints attached to a block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    pub margins: Margins,
    pub corner_radius: f32,
    pub background: Option<String>,
    pub elevation: f32,
    pub clickable: bool,
    /// Navigation target fired on click.
    pub action: Option<String>,
}

/// Thresholds for firing an exposure event.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Fraction of the block's height (0.0..=1.0) that must be inside the viewport.
    pub min_visible_ratio: f32,
    /// How long the ratio must hold before the event fires.
    pub min_dwell_ms: u64,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            min_visible_ratio: 0.5,
            min_dwell_ms: 500,
        }
    }
}

/// The declarative description of one block in a page.
///
/// `id` is the identity used by the diff: it must be unique within a page and stable across
/// reloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    #[serde(default)]
    pub config: BlockConfig,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub load_policy: LoadPolicy,
    #[serde(default)]
    pub cache_policy: CachePolicy,
    #[serde(default)]
    pub exposure: Option<ExposureConfig>,
}

fn default_visible() -> bool {
    true
}

impl BlockDescriptor {
    pub fn new(id: impl Into<String>, block_type: BlockType) -> Self {
        Self {
            id: id.into(),
            block_type,
            config: BlockConfig::default(),
            payload: Payload::new(),
            priority: 0,
            visible: true,
            sticky: false,
            load_policy: LoadPolicy::default(),
            cache_policy: CachePolicy::default(),
            exposure: None,
        }
    }

    pub fn with_config(mut self, config: BlockConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Sets a single payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    pub fn with_load_policy(mut self, load_policy: LoadPolicy) -> Self {
        self.load_policy = load_policy;
        self
    }

    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    pub fn with_exposure(mut self, exposure: Option<ExposureConfig>) -> Self {
        self.exposure = exposure;
        self
    }

    /// The registry key for custom blocks: the payload's `custom_type` field, or the literal
    /// type tag when absent.
    pub fn custom_type_name(&self) -> &str {
        self.payload
            .get(CUSTOM_TYPE_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or(self.block_type.as_str())
    }

    /// Key under which this block's data is cached.
    pub fn cache_key(&self) -> String {
        format!("floor:{}:{}", self.block_type, self.id)
    }
}

/// Source of the current time in milliseconds.
///
/// Cache TTLs and exposure dwell times are computed against this, so tests can drive a simulated
/// clock through [`Clock::Provider`].
#[derive(Clone, Default)]
pub enum Clock {
    /// Wall-clock time since the unix epoch.
    #[default]
    System,
    /// An externally owned time source.
    Provider(Arc<dyn Fn() -> u64 + Send + Sync>),
}

impl Clock {
    pub fn provider(f: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self::Provider(Arc::new(f))
    }

    pub fn now_ms(&self) -> u64 {
        match self {
            Self::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            Self::Provider(f) => f(),
        }
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("System"),
            Self::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}
