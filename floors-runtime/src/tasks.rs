use std::collections::HashMap;
use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Task {
    ticket: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// In-flight block loads, at most one per block id.
///
/// Every spawn gets a fresh ticket; a completion is only current if its ticket still matches
/// (see [`TaskGroup::finish`]). All task tokens are children of one root token, so
/// [`TaskGroup::shutdown`] stops everything at once.
pub(crate) struct TaskGroup {
    root: CancellationToken,
    tasks: HashMap<String, Task>,
    next_ticket: u64,
}

impl TaskGroup {
    pub(crate) fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: HashMap::new(),
            next_ticket: 1,
        }
    }

    /// A token cancelled on shutdown, for work awaited in place rather than spawned.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Spawns the load for `id`, replacing (and cancelling) any previous one.
    ///
    /// Returns `None` without spawning when called outside a tokio runtime or after shutdown.
    pub(crate) fn spawn<F, Fut>(&mut self, id: &str, f: F) -> Option<u64>
    where
        F: FnOnce(u64, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.root.is_cancelled() {
            return None;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            rwarn!(id, "no tokio runtime; load not started");
            return None;
        };
        self.cancel(id);

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let token = self.root.child_token();
        let handle = runtime.spawn(f(ticket, token.clone()));
        self.tasks.insert(
            id.to_owned(),
            Task {
                ticket,
                token,
                handle,
            },
        );
        Some(ticket)
    }

    pub(crate) fn cancel(&mut self, id: &str) -> bool {
        match self.tasks.remove(id) {
            Some(task) => {
                rtrace!(id, ticket = task.ticket, "cancel load");
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every in-flight load and returns their ids, sorted.
    pub(crate) fn cancel_all(&mut self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(self.tasks.len());
        for (id, task) in self.tasks.drain() {
            task.token.cancel();
            ids.push(id);
        }
        ids.sort();
        ids
    }

    /// Retires the task for `id` if `ticket` is its current one.
    pub(crate) fn finish(&mut self, id: &str, ticket: u64) -> bool {
        if self.tasks.get(id).is_some_and(|t| t.ticket == ticket) {
            self.tasks.remove(id);
            true
        } else {
            false
        }
    }

    pub(crate) fn is_running(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancels everything and refuses further spawns.
    pub(crate) fn shutdown(&mut self) {
        self.root.cancel();
        for (_, task) in self.tasks.drain() {
            task.handle.abort();
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
