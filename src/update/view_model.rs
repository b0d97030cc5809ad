// Update View Model - sole holder of the current update state
// Assignments replace the whole state and notify observers on the assigning context

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

use crate::update::{UpdateState, UpdateStateKind};

/// Synchronous observer invoked after every assignment
pub type Observer = Arc<dyn Fn(&UpdateState) + Send + Sync>;

/// Handle returned by [`UpdateViewModel::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

struct ViewModelInner {
    state: watch::Sender<UpdateState>,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicU64,
}

/// Shared container for the single live [`UpdateState`].
///
/// Cloning yields another handle to the same container. No validation is done
/// on assignment; drivers are responsible for only assigning legal successors.
#[derive(Clone)]
pub struct UpdateViewModel {
    inner: Arc<ViewModelInner>,
}

/// Non-owning handle, captured by callbacks stored inside the state itself
#[derive(Clone)]
pub struct WeakUpdateViewModel {
    inner: Weak<ViewModelInner>,
}

impl WeakUpdateViewModel {
    pub fn upgrade(&self) -> Option<UpdateViewModel> {
        self.inner.upgrade().map(|inner| UpdateViewModel { inner })
    }

    /// Assign a state if the view model is still alive
    pub fn set_state(&self, state: UpdateState) {
        if let Some(view_model) = self.upgrade() {
            view_model.set_state(state);
        }
    }
}

impl Default for UpdateViewModel {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateViewModel {
    pub fn new() -> Self {
        let (state, _) = watch::channel(UpdateState::Idle);
        Self {
            inner: Arc::new(ViewModelInner {
                state,
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicU64::new(0),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakUpdateViewModel {
        WeakUpdateViewModel {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Get the current state
    pub fn state(&self) -> UpdateState {
        self.inner.state.borrow().clone()
    }

    /// Get the variant of the current state
    pub fn kind(&self) -> UpdateStateKind {
        self.inner.state.borrow().kind()
    }

    /// Replace the current state and notify observers
    pub fn set_state(&self, new_state: UpdateState) {
        let previous = self.inner.state.send_replace(new_state.clone());

        log::info!(
            "[UpdateViewModel] State transition: {} -> {}",
            previous.kind(),
            new_state.kind()
        );

        // Observers may assign again, so none of our locks are held while they run
        let observers: Vec<Observer> = self
            .inner
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            observer(&new_state);
        }
    }

    /// Register a synchronous observer called after every assignment
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&UpdateState) + Send + Sync + 'static,
    {
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::Relaxed));
        self.inner.observers.lock().push((id, Arc::new(observer)));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// One-shot change notification; call `changed()` again after each change
    /// to re-arm. Only the latest snapshot is retained between wakeups.
    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.inner.state.subscribe()
    }

    /// Resolve once the state satisfies `predicate` (immediately if it already does)
    pub async fn wait_for<P>(&self, mut predicate: P)
    where
        P: FnMut(&UpdateState) -> bool,
    {
        let mut receiver = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = receiver.wait_for(|state| predicate(state)).await;
    }
}
