use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{BlockDescriptor, BlockType, FloorError, Payload};

/// What a block asks its host surface to show.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BlockFrame<'a> {
    Loading,
    Content {
        id: &'a str,
        position: usize,
        payload: &'a Payload,
    },
    Error {
        message: &'a str,
    },
    /// Drawn for descriptors whose type has no registered constructor.
    Placeholder {
        block_type: BlockType,
    },
}

/// The host-side container a block draws into (a row view, an overlay view, ...).
pub trait Surface {
    fn show(&mut self, frame: BlockFrame<'_>);
}

/// A block renderer.
///
/// `parse_payload` turns the untyped payload bag into whatever typed state the renderer needs;
/// `render` is only called after a successful parse.
pub trait Block: Send {
    fn parse_payload(&mut self, raw: &Payload) -> Result<(), FloorError>;

    fn render(&mut self, surface: &mut dyn Surface, position: usize);

    fn show_loading(&mut self, surface: &mut dyn Surface) {
        surface.show(BlockFrame::Loading);
    }

    fn show_error(&mut self, surface: &mut dyn Surface, message: &str) {
        surface.show(BlockFrame::Error { message });
    }

    /// Called when a pooled instance is reused for a (possibly different) descriptor.
    fn reset(&mut self, _descriptor: &BlockDescriptor) {}

    fn destroy(&mut self) {}
}

/// A block whose payload deserializes into `T`.
///
/// Parse failures are reported as `DataParse` errors carrying the descriptor.
pub struct TypedBlock<T> {
    descriptor: BlockDescriptor,
    raw: Option<Payload>,
    data: Option<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedBlock<T> {
    pub fn new(descriptor: &BlockDescriptor) -> Self {
        Self {
            descriptor: descriptor.clone(),
            raw: None,
            data: None,
            _marker: PhantomData,
        }
    }

    /// A constructor suitable for [`BlockRegistry::register`].
    pub fn constructor() -> impl Fn(&BlockDescriptor) -> Option<Box<dyn Block>> + Send + Sync
    where
        T: Send + 'static,
    {
        |d: &BlockDescriptor| Some(Box::new(Self::new(d)) as Box<dyn Block>)
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }
}

impl<T: DeserializeOwned + Send> Block for TypedBlock<T> {
    fn parse_payload(&mut self, raw: &Payload) -> Result<(), FloorError> {
        let value = serde_json::Value::Object(raw.clone());
        let data = serde_json::from_value(value)
            .map_err(|e| FloorError::from(e).with_block(&self.descriptor))?;
        self.data = Some(data);
        self.raw = Some(raw.clone());
        Ok(())
    }

    fn render(&mut self, surface: &mut dyn Surface, position: usize) {
        if let Some(raw) = &self.raw {
            surface.show(BlockFrame::Content {
                id: &self.descriptor.id,
                position,
                payload: raw,
            });
        }
    }

    fn reset(&mut self, descriptor: &BlockDescriptor) {
        self.descriptor = descriptor.clone();
        self.raw = None;
        self.data = None;
    }
}

/// A runtime block bound 1:1 to a descriptor id.
pub struct BlockInstance {
    id: String,
    block_type: BlockType,
    registry_key: RegistryKey,
    block: Box<dyn Block>,
    data_loaded: bool,
    view_bound: bool,
}

impl BlockInstance {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn is_data_loaded(&self) -> bool {
        self.data_loaded
    }

    pub fn is_view_bound(&self) -> bool {
        self.view_bound
    }

    /// Parses `payload` into the block. On failure the previous data (if any) stays bound.
    pub fn bind_payload(&mut self, payload: &Payload) -> Result<(), FloorError> {
        self.block.parse_payload(payload)?;
        self.data_loaded = true;
        Ok(())
    }

    /// Draws content when data is loaded, otherwise the loading state.
    pub fn render(&mut self, surface: &mut dyn Surface, position: usize) {
        if self.data_loaded {
            self.block.render(surface, position);
        } else {
            self.block.show_loading(surface);
        }
        self.view_bound = true;
    }

    pub fn render_error(&mut self, surface: &mut dyn Surface, message: &str) {
        self.block.show_error(surface, message);
        self.view_bound = true;
    }

    pub fn block_mut(&mut self) -> &mut dyn Block {
        self.block.as_mut()
    }

    fn reuse(&mut self, descriptor: &BlockDescriptor) {
        self.id = descriptor.id.clone();
        self.data_loaded = false;
        self.view_bound = false;
        self.block.reset(descriptor);
    }

    pub fn destroy(mut self) {
        self.block.destroy();
    }
}

impl fmt::Debug for BlockInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockInstance")
            .field("id", &self.id)
            .field("block_type", &self.block_type)
            .field("data_loaded", &self.data_loaded)
            .field("view_bound", &self.view_bound)
            .finish_non_exhaustive()
    }
}

/// Builds a block for a descriptor. Returning `None` reports a construction failure.
pub type BlockConstructor = Arc<dyn Fn(&BlockDescriptor) -> Option<Box<dyn Block>> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum RegistryKey {
    Standard(BlockType),
    Custom(String),
}

/// How many recycled instances each registration keeps by default.
pub const DEFAULT_POOL_CAPACITY: usize = 8;

/// Validates payloads against a registered renderer without touching any live instance.
///
/// Built by [`BlockRegistry::payload_check`]; cheap to clone and `Send`, so it can travel into a
/// background load.
#[derive(Clone)]
pub struct PayloadCheck {
    constructor: BlockConstructor,
    descriptor: BlockDescriptor,
}

impl PayloadCheck {
    /// Parses `payload` with a scratch block. A constructor that declines accepts everything.
    pub fn check(&self, payload: &Payload) -> Result<(), FloorError> {
        let Some(mut block) = (self.constructor)(&self.descriptor) else {
            return Ok(());
        };
        let parsed = block.parse_payload(payload);
        block.destroy();
        parsed
    }
}

impl fmt::Debug for PayloadCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCheck")
            .field("id", &self.descriptor.id)
            .finish_non_exhaustive()
    }
}

/// Maps block types (and custom type names) to constructors, with optional instance pooling.
///
/// Pooled instances are keyed by registration and descriptor id. `create` prefers the instance
/// last pooled for the same id and otherwise reuses any instance of the same registration. Each
/// registration keeps at most `pool_capacity` instances; the oldest are destroyed first.
pub struct BlockRegistry {
    standard: HashMap<BlockType, BlockConstructor>,
    custom: HashMap<String, BlockConstructor>,
    pooling: bool,
    pool_capacity: usize,
    pool_seq: u64,
    // (registration, descriptor id) -> (pool order, recycled instance)
    pool: HashMap<(RegistryKey, String), (u64, BlockInstance)>,
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self {
            standard: HashMap::new(),
            custom: HashMap::new(),
            pooling: false,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            pool_seq: 0,
            pool: HashMap::new(),
        }
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity
    }

    pub fn with_pooling(mut self, pooling: bool) -> Self {
        self.pooling = pooling;
        self
    }

    pub fn set_pooling(&mut self, pooling: bool) {
        self.pooling = pooling;
        if !pooling {
            self.clear_pool();
        }
    }

    pub fn pooling(&self) -> bool {
        self.pooling
    }

    pub fn register(
        &mut self,
        block_type: BlockType,
        constructor: impl Fn(&BlockDescriptor) -> Option<Box<dyn Block>> + Send + Sync + 'static,
    ) {
        fdebug!(block_type = block_type.as_str(), "register");
        self.standard.insert(block_type, Arc::new(constructor));
    }

    pub fn register_custom(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn(&BlockDescriptor) -> Option<Box<dyn Block>> + Send + Sync + 'static,
    ) {
        let name = name.into();
        fdebug!(name = name.as_str(), "register_custom");
        self.custom.insert(name, Arc::new(constructor));
    }

    /// Removes a registration and destroys its pooled instances.
    pub fn unregister(&mut self, block_type: BlockType) -> bool {
        let removed = self.standard.remove(&block_type).is_some();
        self.purge_pool(&RegistryKey::Standard(block_type));
        removed
    }

    pub fn unregister_custom(&mut self, name: &str) -> bool {
        let removed = self.custom.remove(name).is_some();
        self.purge_pool(&RegistryKey::Custom(name.to_owned()));
        removed
    }

    pub fn is_registered(&self, descriptor: &BlockDescriptor) -> bool {
        self.constructor_for(&Self::key_for(descriptor)).is_some()
    }

    pub fn registered_types(&self) -> Vec<BlockType> {
        let mut types: Vec<_> = self.standard.keys().copied().collect();
        types.sort();
        types
    }

    pub fn custom_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.custom.keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds (or reuses from the pool) an instance for `descriptor`.
    ///
    /// Returns `None` when nothing is registered for the descriptor's type or the constructor
    /// declined; the caller decides how to render the gap.
    pub fn create(&mut self, descriptor: &BlockDescriptor) -> Option<BlockInstance> {
        let key = Self::key_for(descriptor);

        if self.pooling {
            if let Some(mut instance) = self.take_pooled(&key, &descriptor.id) {
                ftrace!(id = descriptor.id.as_str(), "reusing pooled instance");
                instance.reuse(descriptor);
                return Some(instance);
            }
        }

        let Some(constructor) = self.constructor_for(&key) else {
            fwarn!(
                id = descriptor.id.as_str(),
                block_type = descriptor.block_type.as_str(),
                "no constructor registered"
            );
            return None;
        };
        let block = constructor(descriptor)?;
        Some(BlockInstance {
            id: descriptor.id.clone(),
            block_type: descriptor.block_type,
            registry_key: key,
            block,
            data_loaded: false,
            view_bound: false,
        })
    }

    /// Like [`Self::create`], but reports why creation failed.
    pub fn try_create(&mut self, descriptor: &BlockDescriptor) -> Result<BlockInstance, FloorError> {
        use crate::BlockCreationErrorKind;

        if !self.is_registered(descriptor) {
            return Err(FloorError::block_creation(
                BlockCreationErrorKind::TypeNotRegistered,
                format!("no block registered for `{}`", Self::key_name(descriptor)),
            )
            .with_block(descriptor));
        }
        self.create(descriptor).ok_or_else(|| {
            FloorError::block_creation(
                BlockCreationErrorKind::ConstructorFailed,
                format!("could not create block `{}`", Self::key_name(descriptor)),
            )
            .with_block(descriptor)
        })
    }

    /// A standalone payload validator for `descriptor`, or `None` when its type isn't registered.
    pub fn payload_check(&self, descriptor: &BlockDescriptor) -> Option<PayloadCheck> {
        let constructor = self.constructor_for(&Self::key_for(descriptor))?;
        Some(PayloadCheck {
            constructor: Arc::clone(constructor),
            descriptor: descriptor.clone(),
        })
    }

    /// Hands an instance back. Pooled when pooling is on, destroyed otherwise.
    pub fn recycle(&mut self, instance: BlockInstance) {
        let registered = self.constructor_for(&instance.registry_key).is_some();
        if !(self.pooling && registered && self.pool_capacity > 0) {
            instance.destroy();
            return;
        }

        let registration = instance.registry_key.clone();
        let key = (registration.clone(), instance.id.clone());
        self.pool_seq += 1;
        if let Some((_, old)) = self.pool.insert(key, (self.pool_seq, instance)) {
            old.destroy();
        }

        let mut same: Vec<(u64, String)> = self
            .pool
            .iter()
            .filter(|((k, _), _)| *k == registration)
            .map(|((_, id), (seq, _))| (*seq, id.clone()))
            .collect();
        if same.len() > self.pool_capacity {
            same.sort_unstable();
            let excess = same.len() - self.pool_capacity;
            for (_, id) in same.into_iter().take(excess) {
                if let Some((_, victim)) = self.pool.remove(&(registration.clone(), id)) {
                    victim.destroy();
                }
            }
        }
    }

    pub fn pooled_len(&self) -> usize {
        self.pool.len()
    }

    pub fn clear_pool(&mut self) {
        for (_, (_, instance)) in self.pool.drain() {
            instance.destroy();
        }
    }

    /// The instance pooled for `id`, else the most recently pooled one of the same registration.
    fn take_pooled(&mut self, key: &RegistryKey, id: &str) -> Option<BlockInstance> {
        let exact = (key.clone(), id.to_owned());
        if let Some((_, instance)) = self.pool.remove(&exact) {
            return Some(instance);
        }
        let newest = self
            .pool
            .iter()
            .filter(|((k, _), _)| k == key)
            .max_by_key(|(_, (seq, _))| *seq)
            .map(|(k, _)| k.clone())?;
        self.pool.remove(&newest).map(|(_, instance)| instance)
    }

    fn purge_pool(&mut self, key: &RegistryKey) {
        let victims: Vec<_> = self
            .pool
            .keys()
            .filter(|(k, _)| k == key)
            .cloned()
            .collect();
        for victim in victims {
            if let Some((_, instance)) = self.pool.remove(&victim) {
                instance.destroy();
            }
        }
    }

    fn constructor_for(&self, key: &RegistryKey) -> Option<&BlockConstructor> {
        match key {
            RegistryKey::Standard(t) => self.standard.get(t),
            RegistryKey::Custom(name) => self.custom.get(name),
        }
    }

    fn key_for(descriptor: &BlockDescriptor) -> RegistryKey {
        match descriptor.block_type {
            BlockType::Custom => RegistryKey::Custom(descriptor.custom_type_name().to_owned()),
            t => RegistryKey::Standard(t),
        }
    }

    fn key_name(descriptor: &BlockDescriptor) -> &str {
        match descriptor.block_type {
            BlockType::Custom => descriptor.custom_type_name(),
            t => t.as_str(),
        }
    }
}

impl Drop for BlockRegistry {
    fn drop(&mut self) {
        self.clear_pool();
    }
}

impl fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRegistry")
            .field("standard", &self.registered_types())
            .field("custom", &self.custom_names())
            .field("pooling", &self.pooling)
            .field("pool_capacity", &self.pool_capacity)
            .field("pooled", &self.pool.len())
            .finish()
    }
}
