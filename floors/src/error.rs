use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::BlockDescriptor;

/// The originating error behind a [`FloorError`], if any.
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// Coarse error classes. Strategies are configured per category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    DataParse,
    Cache,
    BlockCreation,
    Resource,
    Lifecycle,
    Custom,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        Self::Network,
        Self::DataParse,
        Self::Cache,
        Self::BlockCreation,
        Self::Resource,
        Self::Lifecycle,
        Self::Custom,
    ];
}

macro_rules! error_kind {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $code:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Stable identifier for this kind, usable as a strategy override key.
            pub fn code(self) -> &'static str {
                match self {
                    $(Self::$variant => $code),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.code())
            }
        }
    };
}

error_kind! {
    NetworkErrorKind {
        Timeout => "NETWORK_TIMEOUT",
        NoConnectivity => "NETWORK_NO_CONNECTION",
        Server => "NETWORK_SERVER_ERROR",
        RequestFailed => "NETWORK_REQUEST_FAILED",
    }
}

error_kind! {
    DataParseErrorKind {
        Malformed => "PARSE_MALFORMED",
        SchemaMismatch => "PARSE_SCHEMA_MISMATCH",
        MissingField => "PARSE_MISSING_FIELD",
        InvalidValue => "PARSE_INVALID_VALUE",
    }
}

error_kind! {
    CacheErrorKind {
        WriteFailed => "CACHE_WRITE_FAILED",
        ReadFailed => "CACHE_READ_FAILED",
        Expired => "CACHE_EXPIRED",
        StorageFull => "CACHE_STORAGE_FULL",
    }
}

error_kind! {
    BlockCreationErrorKind {
        TypeNotRegistered => "BLOCK_TYPE_NOT_REGISTERED",
        ConstructorFailed => "BLOCK_CONSTRUCTOR_FAILED",
        InitializationFailed => "BLOCK_INIT_FAILED",
        InvalidConfig => "BLOCK_INVALID_CONFIG",
    }
}

error_kind! {
    ResourceErrorKind {
        MissingAsset => "RESOURCE_MISSING",
        FetchFailed => "RESOURCE_FETCH_FAILED",
        OutOfMemory => "RESOURCE_OUT_OF_MEMORY",
    }
}

error_kind! {
    LifecycleErrorKind {
        Destroyed => "LIFECYCLE_DESTROYED",
        ContainerDetached => "LIFECYCLE_CONTAINER_DETACHED",
        HostContextLost => "LIFECYCLE_CONTEXT_LOST",
    }
}

/// Every failure the floors stack reports.
///
/// Values are immutable once built; the `with_*` helpers consume and return a new value.
#[derive(Error, Debug, Clone)]
pub enum FloorError {
    #[error("[{}] {message}", .kind.code())]
    Network {
        kind: NetworkErrorKind,
        message: String,
        #[source]
        cause: Option<Cause>,
        block: Option<Box<BlockDescriptor>>,
    },
    #[error("[{}] {message}", .kind.code())]
    DataParse {
        kind: DataParseErrorKind,
        message: String,
        #[source]
        cause: Option<Cause>,
        block: Option<Box<BlockDescriptor>>,
    },
    #[error("[{}] {message}", .kind.code())]
    Cache {
        kind: CacheErrorKind,
        message: String,
        #[source]
        cause: Option<Cause>,
        block: Option<Box<BlockDescriptor>>,
    },
    #[error("[{}] {message}", .kind.code())]
    BlockCreation {
        kind: BlockCreationErrorKind,
        message: String,
        #[source]
        cause: Option<Cause>,
        block: Option<Box<BlockDescriptor>>,
    },
    #[error("[{}] {message}", .kind.code())]
    Resource {
        kind: ResourceErrorKind,
        message: String,
        #[source]
        cause: Option<Cause>,
        block: Option<Box<BlockDescriptor>>,
    },
    #[error("[{}] {message}", .kind.code())]
    Lifecycle {
        kind: LifecycleErrorKind,
        message: String,
        #[source]
        cause: Option<Cause>,
        block: Option<Box<BlockDescriptor>>,
    },
    #[error("[{code}] {message}")]
    Custom {
        code: String,
        message: String,
        #[source]
        cause: Option<Cause>,
        block: Option<Box<BlockDescriptor>>,
    },
}

impl FloorError {
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
            cause: None,
            block: None,
        }
    }

    pub fn data_parse(kind: DataParseErrorKind, message: impl Into<String>) -> Self {
        Self::DataParse {
            kind,
            message: message.into(),
            cause: None,
            block: None,
        }
    }

    pub fn cache(kind: CacheErrorKind, message: impl Into<String>) -> Self {
        Self::Cache {
            kind,
            message: message.into(),
            cause: None,
            block: None,
        }
    }

    pub fn block_creation(kind: BlockCreationErrorKind, message: impl Into<String>) -> Self {
        Self::BlockCreation {
            kind,
            message: message.into(),
            cause: None,
            block: None,
        }
    }

    pub fn resource(kind: ResourceErrorKind, message: impl Into<String>) -> Self {
        Self::Resource {
            kind,
            message: message.into(),
            cause: None,
            block: None,
        }
    }

    pub fn lifecycle(kind: LifecycleErrorKind, message: impl Into<String>) -> Self {
        Self::Lifecycle {
            kind,
            message: message.into(),
            cause: None,
            block: None,
        }
    }

    pub fn custom(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Custom {
            code: code.into(),
            message: message.into(),
            cause: None,
            block: None,
        }
    }

    /// Shorthand for the error every operation returns after `destroy()`.
    pub fn destroyed() -> Self {
        Self::lifecycle(LifecycleErrorKind::Destroyed, "floor manager already destroyed")
    }

    pub fn with_cause(mut self, err: impl StdError + Send + Sync + 'static) -> Self {
        *self.cause_slot() = Some(Arc::new(err));
        self
    }

    pub fn with_block(mut self, descriptor: &BlockDescriptor) -> Self {
        *self.block_slot() = Some(Box::new(descriptor.clone()));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } => ErrorCategory::Network,
            Self::DataParse { .. } => ErrorCategory::DataParse,
            Self::Cache { .. } => ErrorCategory::Cache,
            Self::BlockCreation { .. } => ErrorCategory::BlockCreation,
            Self::Resource { .. } => ErrorCategory::Resource,
            Self::Lifecycle { .. } => ErrorCategory::Lifecycle,
            Self::Custom { .. } => ErrorCategory::Custom,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Network { kind, .. } => kind.code(),
            Self::DataParse { kind, .. } => kind.code(),
            Self::Cache { kind, .. } => kind.code(),
            Self::BlockCreation { kind, .. } => kind.code(),
            Self::Resource { kind, .. } => kind.code(),
            Self::Lifecycle { kind, .. } => kind.code(),
            Self::Custom { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Network { message, .. }
            | Self::DataParse { message, .. }
            | Self::Cache { message, .. }
            | Self::BlockCreation { message, .. }
            | Self::Resource { message, .. }
            | Self::Lifecycle { message, .. }
            | Self::Custom { message, .. } => message,
        }
    }

    /// The descriptor of the block that failed, when the failure is block-local.
    pub fn block(&self) -> Option<&BlockDescriptor> {
        match self {
            Self::Network { block, .. }
            | Self::DataParse { block, .. }
            | Self::Cache { block, .. }
            | Self::BlockCreation { block, .. }
            | Self::Resource { block, .. }
            | Self::Lifecycle { block, .. }
            | Self::Custom { block, .. } => block.as_deref(),
        }
    }

    /// Lifecycle errors are terminal; everything else can be recovered by some strategy.
    pub fn is_recoverable(&self) -> bool {
        self.category() != ErrorCategory::Lifecycle
    }

    /// Text suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network {
                kind: NetworkErrorKind::NoConnectivity,
                ..
            } => "No network connection. Check your connection and try again.".to_owned(),
            Self::Network {
                kind: NetworkErrorKind::Timeout,
                ..
            } => "The request timed out. Please try again.".to_owned(),
            Self::Network { .. } => "Couldn't load content. Please try again later.".to_owned(),
            Self::DataParse { .. } => "This content couldn't be displayed.".to_owned(),
            Self::Cache { .. } => "Stored content is unavailable.".to_owned(),
            Self::BlockCreation { .. } => "This section isn't supported yet.".to_owned(),
            Self::Resource {
                kind: ResourceErrorKind::OutOfMemory,
                ..
            } => "Not enough memory to show this content.".to_owned(),
            Self::Resource { .. } => "Some content is missing.".to_owned(),
            Self::Lifecycle { .. } => "This page is no longer active.".to_owned(),
            Self::Custom { message, .. } => message.clone(),
        }
    }

    fn cause_slot(&mut self) -> &mut Option<Cause> {
        match self {
            Self::Network { cause, .. }
            | Self::DataParse { cause, .. }
            | Self::Cache { cause, .. }
            | Self::BlockCreation { cause, .. }
            | Self::Resource { cause, .. }
            | Self::Lifecycle { cause, .. }
            | Self::Custom { cause, .. } => cause,
        }
    }

    fn block_slot(&mut self) -> &mut Option<Box<BlockDescriptor>> {
        match self {
            Self::Network { block, .. }
            | Self::DataParse { block, .. }
            | Self::Cache { block, .. }
            | Self::BlockCreation { block, .. }
            | Self::Resource { block, .. }
            | Self::Lifecycle { block, .. }
            | Self::Custom { block, .. } => block,
        }
    }
}

impl From<serde_json::Error> for FloorError {
    fn from(err: serde_json::Error) -> Self {
        use serde_json::error::Category;

        let kind = match err.classify() {
            Category::Data => DataParseErrorKind::SchemaMismatch,
            Category::Syntax | Category::Eof => DataParseErrorKind::Malformed,
            Category::Io => DataParseErrorKind::Malformed,
        };
        let message = err.to_string();
        FloorError::data_parse(kind, message).with_cause(err)
    }
}
