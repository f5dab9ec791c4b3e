use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ErrorCategory, FloorError};

/// What to do when an error of some category (or code) is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Ignore,
    Retry,
    Fallback,
    FailFast,
    NotifyUser,
}

impl Strategy {
    /// The built-in category table used when nothing is configured.
    pub fn default_for(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Network => Self::Retry,
            ErrorCategory::DataParse => Self::Fallback,
            ErrorCategory::Cache => Self::Ignore,
            ErrorCategory::BlockCreation => Self::Fallback,
            ErrorCategory::Resource => Self::Fallback,
            ErrorCategory::Lifecycle => Self::FailFast,
            ErrorCategory::Custom => Self::NotifyUser,
        }
    }
}

/// Bounded retry with capped exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_initial_delay_ms(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exp);
        let ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Serializable strategy configuration applied to an [`ErrorHandler`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPolicy {
    pub categories: BTreeMap<ErrorCategory, Strategy>,
    pub codes: BTreeMap<String, Strategy>,
    pub retry: RetryPolicy,
}

impl ErrorPolicy {
    pub fn with_category(mut self, category: ErrorCategory, strategy: Strategy) -> Self {
        self.categories.insert(category, strategy);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>, strategy: Strategy) -> Self {
        self.codes.insert(code.into(), strategy);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A recovery routine for one error code. Returns whether recovery succeeded.
pub type RecoveryAction = Arc<dyn Fn(&FloorError) -> bool + Send + Sync>;

/// Observes every handled error. Panics inside a listener are swallowed.
pub type ErrorListener = Arc<dyn Fn(&FloorError) + Send + Sync>;

/// Receives the user-facing message for errors resolved to [`Strategy::NotifyUser`].
pub type UserNotifier = Arc<dyn Fn(&str, &FloorError) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Strategies {
    categories: HashMap<ErrorCategory, Strategy>,
    codes: HashMap<String, Strategy>,
}

/// Classifies, counts and recovers from [`FloorError`]s.
///
/// Classification lives on the error, policy in the strategy tables, mechanism in the recovery
/// actions; each can be swapped independently.
pub struct ErrorHandler {
    strategies: RwLock<Strategies>,
    recovery: RwLock<HashMap<String, RecoveryAction>>,
    listeners: RwLock<Vec<(ListenerId, ErrorListener)>>,
    notifier: RwLock<Option<UserNotifier>>,
    counts: Mutex<HashMap<String, u64>>,
    retry: RwLock<RetryPolicy>,
    next_listener: AtomicU64,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(Strategies::default()),
            recovery: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            notifier: RwLock::new(None),
            counts: Mutex::new(HashMap::new()),
            retry: RwLock::new(RetryPolicy::default()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn with_policy(policy: &ErrorPolicy) -> Self {
        let handler = Self::new();
        handler.apply_policy(policy);
        handler
    }

    /// Replaces all strategy overrides and the retry policy.
    pub fn apply_policy(&self, policy: &ErrorPolicy) {
        let mut s = write(&self.strategies);
        s.categories = policy.categories.iter().map(|(k, v)| (*k, *v)).collect();
        s.codes = policy.codes.clone().into_iter().collect();
        drop(s);
        *write(&self.retry) = policy.retry;
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        *read(&self.retry)
    }

    pub fn set_category_strategy(&self, category: ErrorCategory, strategy: Strategy) {
        write(&self.strategies).categories.insert(category, strategy);
    }

    pub fn set_code_strategy(&self, code: impl Into<String>, strategy: Strategy) {
        write(&self.strategies).codes.insert(code.into(), strategy);
    }

    pub fn register_recovery(
        &self,
        code: impl Into<String>,
        action: impl Fn(&FloorError) -> bool + Send + Sync + 'static,
    ) {
        write(&self.recovery).insert(code.into(), Arc::new(action));
    }

    pub fn has_recovery(&self, code: &str) -> bool {
        read(&self.recovery).contains_key(code)
    }

    pub fn add_listener(&self, listener: impl Fn(&FloorError) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        write(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = write(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }

    pub fn set_notifier(&self, notifier: Option<impl Fn(&str, &FloorError) + Send + Sync + 'static>) {
        *write(&self.notifier) = notifier.map(|f| Arc::new(f) as _);
    }

    /// Resolves the strategy for an error: code override, then category override, then the
    /// built-in table. Lifecycle errors always resolve to [`Strategy::FailFast`].
    pub fn strategy_for(&self, error: &FloorError) -> Strategy {
        let category = error.category();
        if category == ErrorCategory::Lifecycle {
            return Strategy::FailFast;
        }
        let s = read(&self.strategies);
        s.codes
            .get(error.code())
            .or_else(|| s.categories.get(&category))
            .copied()
            .unwrap_or_else(|| Strategy::default_for(category))
    }

    /// Counts, broadcasts and applies the resolved strategy.
    ///
    /// Returns `true` when the error is considered handled. `false` means the caller must treat
    /// it as terminal.
    pub fn handle(&self, error: &FloorError) -> bool {
        self.count(error.code());

        let listeners: Vec<ErrorListener> =
            read(&self.listeners).iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(error))).is_err() {
                fwarn!(code = error.code(), "error listener panicked");
            }
        }

        let strategy = self.strategy_for(error);
        fdebug!(code = error.code(), ?strategy, "handling error");
        match strategy {
            Strategy::Ignore => true,
            Strategy::Retry => self.has_recovery(error.code()),
            Strategy::Fallback => {
                let action = read(&self.recovery).get(error.code()).cloned();
                match action {
                    Some(action) => catch_unwind(AssertUnwindSafe(|| action(error))).unwrap_or(false),
                    None => false,
                }
            }
            Strategy::FailFast => false,
            Strategy::NotifyUser => {
                let notifier = read(&self.notifier).clone();
                if let Some(notify) = notifier {
                    let message = error.user_message();
                    if catch_unwind(AssertUnwindSafe(|| notify(&message, error))).is_err() {
                        fwarn!(code = error.code(), "user notifier panicked");
                    }
                }
                true
            }
        }
    }

    pub fn error_count(&self, code: &str) -> u64 {
        lock(&self.counts).get(code).copied().unwrap_or(0)
    }

    pub fn error_counts(&self) -> BTreeMap<String, u64> {
        lock(&self.counts).iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    pub fn total_errors(&self) -> u64 {
        lock(&self.counts).values().sum()
    }

    pub fn reset_counts(&self) {
        lock(&self.counts).clear();
    }

    fn count(&self, code: &str) {
        let mut counts = lock(&self.counts);
        *counts.entry(code.to_owned()).or_insert(0) += 1;
    }
}

impl core::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("retry", &self.retry_policy())
            .field("total_errors", &self.total_errors())
            .finish_non_exhaustive()
    }
}

// A panicking listener must not poison the handler for everyone else.
fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
