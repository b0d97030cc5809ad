// Install Loop - drives every confirmable step of an update without user interaction
// Owns the force-install flag; stale loops from a superseded attempt exit on their next wakeup

use parking_lot::Mutex;
use std::sync::Arc;

use crate::update::UpdateViewModel;

#[derive(Debug, Default)]
struct LoopState {
    active: bool,
    generation: u64,
}

impl LoopState {
    fn is_current(&self, generation: u64) -> bool {
        self.active && self.generation == generation
    }
}

/// Force-install confirm loop over an [`UpdateViewModel`]
#[derive(Clone, Default)]
pub struct InstallLoop {
    state: Arc<Mutex<LoopState>>,
}

impl InstallLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a force install is currently in progress
    pub fn is_running(&self) -> bool {
        self.state.lock().active
    }

    /// Confirm the current state and keep confirming every installable state
    /// that follows, until a non-installable state is reached or [`stop`] is
    /// called. Returns `false` (and does nothing) if the current state is not
    /// installable or a loop is already running.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// [`stop`]: InstallLoop::stop
    pub fn start(&self, view_model: &UpdateViewModel) -> bool {
        // Subscribe before confirming so a synchronous transition is not missed
        let mut receiver = view_model.subscribe();
        let current = receiver.borrow_and_update().clone();

        if !current.is_installable() {
            log::debug!(
                "[InstallLoop] Not starting, {} is not installable",
                current.kind()
            );
            return false;
        }

        let generation = {
            let mut state = self.state.lock();
            if state.active {
                log::debug!("[InstallLoop] Not starting, already running");
                return false;
            }
            state.active = true;
            state.generation += 1;
            state.generation
        };

        log::info!(
            "[InstallLoop] Force installing from {} (attempt {})",
            current.kind(),
            generation
        );
        current.confirm();

        let loop_state = self.state.clone();
        tokio::spawn(async move {
            loop {
                if receiver.changed().await.is_err() {
                    Self::finish(&loop_state, generation);
                    break;
                }

                if !loop_state.lock().is_current(generation) {
                    log::debug!("[InstallLoop] Attempt {} superseded, exiting", generation);
                    break;
                }

                let state = receiver.borrow_and_update().clone();
                if state.is_installable() {
                    log::debug!("[InstallLoop] Confirming {}", state.kind());
                    state.confirm();
                } else {
                    log::info!(
                        "[InstallLoop] Reached {}, force install finished",
                        state.kind()
                    );
                    Self::finish(&loop_state, generation);
                    break;
                }
            }
        });

        true
    }

    /// Clear the flag; the running loop exits on its next wakeup
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.active {
            log::info!("[InstallLoop] Stopping attempt {}", state.generation);
        }
        state.active = false;
    }

    fn finish(state: &Mutex<LoopState>, generation: u64) {
        let mut state = state.lock();
        if state.generation == generation {
            state.active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{callback, reply, UpdateChoice, UpdateError, UpdateState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn counted_update_available(count: &Arc<AtomicUsize>) -> UpdateState {
        let count = count.clone();
        UpdateState::UpdateAvailable {
            item: crate::update::AppcastItem::new("1.1.0"),
            reply: reply(move |choice: UpdateChoice| {
                if choice == UpdateChoice::Install {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_start_from_non_installable_state() {
        let view_model = UpdateViewModel::new();
        let install_loop = InstallLoop::new();

        assert!(!install_loop.start(&view_model));
        assert!(!install_loop.is_running());

        view_model.set_state(UpdateState::Checking {
            cancel: callback(|| {}),
        });
        assert!(!install_loop.start(&view_model));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirms_until_installing() {
        let view_model = UpdateViewModel::new();
        let install_loop = InstallLoop::new();

        // Install choice moves straight to downloading
        let weak = view_model.downgrade();
        view_model.set_state(UpdateState::UpdateAvailable {
            item: crate::update::AppcastItem::new("1.1.0"),
            reply: reply(move |choice: UpdateChoice| {
                if choice == UpdateChoice::Install {
                    weak.set_state(UpdateState::Downloading {
                        cancel: callback(|| {}),
                        expected_length: Some(10),
                        progress: 0,
                    });
                }
            }),
        });

        assert!(install_loop.start(&view_model));
        assert!(install_loop.is_running());
        assert!(matches!(view_model.state(), UpdateState::Downloading { .. }));

        view_model.set_state(UpdateState::Extracting {
            progress: 0.5,
            cancel: callback(|| {}),
        });
        settle().await;
        assert!(install_loop.is_running());

        view_model.set_state(UpdateState::Installing {
            is_auto_update: false,
            retry_terminating_application: callback(|| {}),
            dismiss: callback(|| {}),
        });
        settle().await;
        assert!(!install_loop.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_confirms_error_state() {
        let view_model = UpdateViewModel::new();
        let install_loop = InstallLoop::new();
        let installs = Arc::new(AtomicUsize::new(0));
        let retries = Arc::new(AtomicUsize::new(0));

        view_model.set_state(counted_update_available(&installs));
        assert!(install_loop.start(&view_model));

        let r = retries.clone();
        view_model.set_state(UpdateState::Error {
            error: UpdateError::Service("download failed".to_string()),
            retry: callback(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }),
            dismiss: callback(|| {}),
        });
        settle().await;

        assert_eq!(installs.load(Ordering::SeqCst), 1);
        assert_eq!(retries.load(Ordering::SeqCst), 0);
        assert!(!install_loop.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_noop_while_running() {
        let view_model = UpdateViewModel::new();
        let install_loop = InstallLoop::new();
        let installs = Arc::new(AtomicUsize::new(0));

        view_model.set_state(counted_update_available(&installs));
        assert!(install_loop.start(&view_model));
        assert!(!install_loop.start(&view_model));

        assert_eq!(installs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_loop() {
        let view_model = UpdateViewModel::new();
        let install_loop = InstallLoop::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        view_model.set_state(counted_update_available(&first));
        assert!(install_loop.start(&view_model));
        install_loop.stop();
        assert!(!install_loop.is_running());

        view_model.set_state(counted_update_available(&second));
        settle().await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_loop_exits() {
        let view_model = UpdateViewModel::new();
        let install_loop = InstallLoop::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        view_model.set_state(counted_update_available(&first));
        assert!(install_loop.start(&view_model));
        install_loop.stop();
        assert!(install_loop.start(&view_model));
        assert_eq!(first.load(Ordering::SeqCst), 2);

        // Only the current attempt confirms the next state
        view_model.set_state(counted_update_available(&second));
        settle().await;
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert!(install_loop.is_running());
    }
}
