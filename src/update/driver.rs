// Update Driver - maps update service events onto view model assignments
// This is the callback surface an update framework calls into; each event becomes one state

use parking_lot::Mutex;
use std::sync::Arc;

use crate::update::{
    callback, reply, AppcastItem, Callback, PermissionRequest, Reply, UpdateChoice, UpdateError,
    UpdateState, UpdateViewModel, WeakUpdateViewModel,
};

/// How far the service got with an update before reporting it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    /// Nothing downloaded yet
    NotDownloaded,
    /// Downloaded in the background, waiting to be installed
    Downloaded,
    /// Downloaded and staged; installs on the next relaunch
    Installing,
}

/// Adapter handed to the update service at construction.
///
/// Holds only a weak reference to the view model so callbacks stored inside
/// the state do not keep it alive.
#[derive(Clone)]
pub struct UpdateDriver {
    view_model: WeakUpdateViewModel,
    retry_handler: Arc<Mutex<Option<Callback>>>,
    // Download cancellation stays valid while extracting
    download_cancel: Arc<Mutex<Option<Callback>>>,
}

impl UpdateDriver {
    pub fn new(view_model: &UpdateViewModel) -> Self {
        Self {
            view_model: view_model.downgrade(),
            retry_handler: Arc::new(Mutex::new(None)),
            download_cancel: Arc::new(Mutex::new(None)),
        }
    }

    /// Action run by the retry button of an error state
    pub fn set_retry_handler(&self, handler: Callback) {
        *self.retry_handler.lock() = Some(handler);
    }

    fn set_state(&self, state: UpdateState) {
        self.view_model.set_state(state);
    }

    fn current_state(&self) -> Option<UpdateState> {
        self.view_model.upgrade().map(|view_model| view_model.state())
    }

    /// Wrap a service callback so the state returns to idle before it runs
    fn idle_then(&self, f: Callback) -> Callback {
        let view_model = self.view_model.clone();
        callback(move || {
            view_model.set_state(UpdateState::Idle);
            f();
        })
    }

    pub fn show_permission_request(&self, request: PermissionRequest, service_reply: Reply<bool>) {
        log::info!("[UpdateDriver] Permission request");
        let view_model = self.view_model.clone();
        self.set_state(UpdateState::PermissionRequest {
            request,
            reply: reply(move |automatic_checks: bool| {
                view_model.set_state(UpdateState::Idle);
                service_reply(automatic_checks);
            }),
        });
    }

    pub fn show_user_initiated_update_check(&self, cancellation: Callback) {
        self.set_state(UpdateState::Checking {
            cancel: self.idle_then(cancellation),
        });
    }

    pub fn show_update_found(
        &self,
        item: AppcastItem,
        stage: UpdateStage,
        service_reply: Reply<UpdateChoice>,
    ) {
        log::info!(
            "[UpdateDriver] Update found: {} ({:?})",
            item.display_version,
            stage
        );

        if stage == UpdateStage::Installing {
            let install = service_reply.clone();
            let dismiss = service_reply;
            let view_model = self.view_model.clone();
            self.set_state(UpdateState::Installing {
                is_auto_update: true,
                retry_terminating_application: callback(move || install(UpdateChoice::Install)),
                dismiss: callback(move || {
                    view_model.set_state(UpdateState::Idle);
                    dismiss(UpdateChoice::Dismiss);
                }),
            });
            return;
        }

        let view_model = self.view_model.clone();
        self.set_state(UpdateState::UpdateAvailable {
            item,
            reply: reply(move |choice: UpdateChoice| {
                if choice != UpdateChoice::Install {
                    view_model.set_state(UpdateState::Idle);
                }
                service_reply(choice);
            }),
        });
    }

    pub fn show_update_not_found(&self, acknowledgement: Callback) {
        self.set_state(UpdateState::NotFound {
            acknowledgement: self.idle_then(acknowledgement),
        });
    }

    pub fn show_updater_error(&self, error: UpdateError, acknowledgement: Callback) {
        log::error!("[UpdateDriver] Updater error: {}", error);
        self.download_cancel.lock().take();

        let view_model = self.view_model.clone();
        let retry_handler = self.retry_handler.clone();
        let ack = acknowledgement.clone();
        self.set_state(UpdateState::Error {
            error,
            retry: callback(move || {
                ack();
                view_model.set_state(UpdateState::Idle);
                let handler = retry_handler.lock().clone();
                if let Some(handler) = handler {
                    handler();
                }
            }),
            dismiss: self.idle_then(acknowledgement),
        });
    }

    pub fn show_download_initiated(&self, cancellation: Callback) {
        let cancel = self.idle_then(cancellation);
        *self.download_cancel.lock() = Some(cancel.clone());
        self.set_state(UpdateState::Downloading {
            cancel,
            expected_length: None,
            progress: 0,
        });
    }

    pub fn show_download_expected_length(&self, expected: u64) {
        if let Some(UpdateState::Downloading {
            cancel, progress, ..
        }) = self.current_state()
        {
            self.set_state(UpdateState::Downloading {
                cancel,
                expected_length: Some(expected),
                progress,
            });
        }
    }

    pub fn show_download_received_data(&self, length: u64) {
        if let Some(UpdateState::Downloading {
            cancel,
            expected_length,
            progress,
        }) = self.current_state()
        {
            self.set_state(UpdateState::Downloading {
                cancel,
                expected_length,
                progress: progress.saturating_add(length),
            });
        }
    }

    pub fn show_extraction_started(&self) {
        let download_cancel = self.download_cancel.lock().clone();
        let cancel = match download_cancel {
            Some(cancel) => cancel,
            None => self.idle_then(callback(|| {})),
        };
        self.set_state(UpdateState::Extracting {
            progress: 0.0,
            cancel,
        });
    }

    pub fn show_extraction_progress(&self, progress: f64) {
        if let Some(UpdateState::Extracting { cancel, .. }) = self.current_state() {
            self.set_state(UpdateState::Extracting {
                progress: progress.clamp(0.0, 1.0),
                cancel,
            });
        }
    }

    /// The payload is verified and staged; installing is always the next step
    pub fn show_ready_to_install(&self, service_reply: Reply<UpdateChoice>) {
        log::info!("[UpdateDriver] Ready to install, proceeding");
        service_reply(UpdateChoice::Install);
    }

    pub fn show_installing(&self, application_terminated: bool, retry_terminating: Callback) {
        log::info!(
            "[UpdateDriver] Installing (application terminated: {})",
            application_terminated
        );
        self.download_cancel.lock().take();
        let view_model = self.view_model.clone();
        self.set_state(UpdateState::Installing {
            is_auto_update: false,
            retry_terminating_application: retry_terminating,
            dismiss: callback(move || view_model.set_state(UpdateState::Idle)),
        });
    }

    pub fn show_installed_and_relaunched(&self, acknowledgement: Callback) {
        log::info!("[UpdateDriver] Update installed and relaunched");
        acknowledgement();
        self.set_state(UpdateState::Idle);
    }

    /// The service ended its update session
    pub fn dismiss_installation(&self) {
        self.download_cancel.lock().take();
        self.set_state(UpdateState::Idle);
    }
}
