// Update Controller - binds the lifecycle state machine to the real update service
// Exposes the "check for updates" and "force install" actions and the menu validation hook

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::update::{
    callback, load_config, InstallLoop, SettleStrategy, UpdateDriver, UpdateError, UpdateState,
    UpdateViewModel, UpdaterConfig,
};

/// The external update service (feed fetching, download, verification and
/// installation all live behind this). Results come back through the
/// [`UpdateDriver`] the service was constructed with.
pub trait UpdateService: Send + Sync + 'static {
    /// Initialise and register the service
    fn start(&self) -> Result<(), UpdateError>;

    /// Request a user-initiated check
    fn check_for_updates(&self);

    /// Whether a check can be started right now
    fn can_check_for_updates(&self) -> bool;
}

/// Menu items the controller validates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    CheckForUpdates,
    InstallUpdate,
    Other,
}

struct ControllerInner<S: UpdateService> {
    service: S,
    view_model: UpdateViewModel,
    install_loop: InstallLoop,
    config: UpdaterConfig,
    /// A check is scheduled behind a settle delay
    pending_check: AtomicBool,
}

/// Real-service driver of the update state machine
pub struct UpdateController<S: UpdateService> {
    inner: Arc<ControllerInner<S>>,
}

impl<S: UpdateService> UpdateController<S> {
    /// Create a controller. `make_service` receives the driver that routes
    /// service events into this controller's view model.
    pub fn new<F>(config: UpdaterConfig, make_service: F) -> Self
    where
        F: FnOnce(UpdateDriver, &UpdaterConfig) -> S,
    {
        let view_model = UpdateViewModel::new();
        let driver = UpdateDriver::new(&view_model);
        let service = make_service(driver.clone(), &config);

        let inner = Arc::new(ControllerInner {
            service,
            view_model,
            install_loop: InstallLoop::new(),
            config,
            pending_check: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        driver.set_retry_handler(callback(move || {
            if let Some(inner) = weak.upgrade() {
                ControllerInner::check_for_updates(&inner);
            }
        }));

        Self { inner }
    }

    /// Create a controller using the configuration file, or defaults
    pub fn with_defaults<F>(make_service: F) -> Self
    where
        F: FnOnce(UpdateDriver, &UpdaterConfig) -> S,
    {
        let config = load_config();
        log::info!(
            "[UpdateController] Using feed: {} (channel: {})",
            config.feed_url,
            config.channel
        );
        if config.automatic_checks {
            log::info!(
                "[UpdateController] Automatic checks every {:?}",
                config.check_interval()
            );
        } else {
            log::info!("[UpdateController] Automatic checks disabled");
        }
        Self::new(config, make_service)
    }

    pub fn view_model(&self) -> &UpdateViewModel {
        &self.inner.view_model
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.inner.config
    }

    pub fn service(&self) -> &S {
        &self.inner.service
    }

    /// Start the update service. Failure is surfaced as an error state whose
    /// retry re-attempts the start; it never propagates to the caller.
    pub fn start(&self) {
        ControllerInner::start(&self.inner);
    }

    /// Request a check. From idle the request is immediate; otherwise the
    /// stale flow is cancelled first and the request is issued once it settles.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn check_for_updates(&self) {
        ControllerInner::check_for_updates(&self.inner);
    }

    /// Force install: confirm every installable step until a terminal state.
    /// No-op unless the current state is installable and no loop is running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn install_update(&self) {
        if !self.inner.install_loop.start(&self.inner.view_model) {
            log::debug!(
                "[UpdateController] Force install ignored in {}",
                self.inner.view_model.kind()
            );
        }
    }

    pub fn is_force_installing(&self) -> bool {
        self.inner.install_loop.is_running()
    }

    /// Menu validation hook
    pub fn validate_menu_item(&self, action: MenuAction) -> bool {
        match action {
            MenuAction::CheckForUpdates => self.inner.service.can_check_for_updates(),
            MenuAction::InstallUpdate | MenuAction::Other => true,
        }
    }

    /// Clear the force-install flag. An in-flight download stays with the service.
    pub fn teardown(&self) {
        self.inner.install_loop.stop();
    }
}

impl<S: UpdateService> Drop for UpdateController<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<S: UpdateService> ControllerInner<S> {
    fn start(this: &Arc<Self>) {
        match this.service.start() {
            Ok(()) => log::info!("[UpdateController] Update service started"),
            Err(e) => {
                log::error!("[UpdateController] Failed to start update service: {}", e);
                let error = if matches!(e, UpdateError::ServiceStart(_)) {
                    e
                } else {
                    UpdateError::ServiceStart(e.to_string())
                };

                let weak: Weak<Self> = Arc::downgrade(this);
                let retry_view_model = this.view_model.downgrade();
                let dismiss_view_model = this.view_model.downgrade();
                this.view_model.set_state(UpdateState::Error {
                    error,
                    retry: callback(move || {
                        retry_view_model.set_state(UpdateState::Idle);
                        if let Some(inner) = weak.upgrade() {
                            Self::start(&inner);
                        }
                    }),
                    dismiss: callback(move || dismiss_view_model.set_state(UpdateState::Idle)),
                });
            }
        }
    }

    fn check_for_updates(this: &Arc<Self>) {
        // The cancelled flow may already read idle while its restart is still pending
        if this.pending_check.load(Ordering::SeqCst) {
            log::debug!("[UpdateController] Check already scheduled");
            return;
        }

        let state = this.view_model.state();
        if state.is_idle() {
            log::info!("[UpdateController] Checking for updates");
            this.service.check_for_updates();
            return;
        }

        if this.pending_check.swap(true, Ordering::SeqCst) {
            log::debug!("[UpdateController] Check already scheduled");
            return;
        }

        log::info!(
            "[UpdateController] Cancelling stale {} flow before checking",
            state.kind()
        );
        this.install_loop.stop();
        state.cancel();

        // Cancellation settles asynchronously; the fixed delay is a best effort, not a guarantee
        let weak = Arc::downgrade(this);
        let settle = this.config.settle();
        let view_model = this.view_model.clone();
        tokio::spawn(async move {
            match settle {
                SettleStrategy::FixedDelay(delay) => tokio::time::sleep(delay).await,
                SettleStrategy::WaitForIdle { timeout } => {
                    let settled =
                        tokio::time::timeout(timeout, view_model.wait_for(UpdateState::is_idle))
                            .await;
                    if settled.is_err() {
                        log::warn!(
                            "[UpdateController] State did not settle within {:?}, checking anyway",
                            timeout
                        );
                    }
                }
            }

            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.pending_check.store(false, Ordering::SeqCst);
            log::info!("[UpdateController] Checking for updates");
            inner.service.check_for_updates();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{
        reply, AppcastItem, SettleMode, UpdateChoice, UpdateStage, UpdateStateKind,
    };
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Records requests; tests push service events through `driver`
    struct MockService {
        driver: UpdateDriver,
        starts: AtomicUsize,
        checks: AtomicUsize,
        fail_start: AtomicBool,
        can_check: AtomicBool,
        choices: Arc<Mutex<Vec<UpdateChoice>>>,
    }

    impl MockService {
        fn new(driver: UpdateDriver) -> Self {
            Self {
                driver,
                starts: AtomicUsize::new(0),
                checks: AtomicUsize::new(0),
                fail_start: AtomicBool::new(false),
                can_check: AtomicBool::new(true),
                choices: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }

        fn found(&self, version: &str) {
            let choices = self.choices.clone();
            self.driver.show_update_found(
                AppcastItem::new(version),
                UpdateStage::NotDownloaded,
                reply(move |choice: UpdateChoice| choices.lock().push(choice)),
            );
        }
    }

    impl UpdateService for MockService {
        fn start(&self) -> Result<(), UpdateError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start.load(Ordering::SeqCst) {
                Err(UpdateError::ServiceStart("bundle is not signed".to_string()))
            } else {
                Ok(())
            }
        }

        fn check_for_updates(&self) {
            self.checks.fetch_add(1, Ordering::SeqCst);
        }

        fn can_check_for_updates(&self) -> bool {
            self.can_check.load(Ordering::SeqCst)
        }
    }

    fn create_test_controller(config: UpdaterConfig) -> UpdateController<MockService> {
        UpdateController::new(config, |driver, _| MockService::new(driver))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_success_stays_idle() {
        let controller = create_test_controller(UpdaterConfig::default());
        controller.start();

        assert!(controller.view_model().state().is_idle());
        assert_eq!(controller.service().starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_surfaces_error_with_retry() {
        let controller = create_test_controller(UpdaterConfig::default());
        controller.service().fail_start.store(true, Ordering::SeqCst);
        controller.start();

        match controller.view_model().state() {
            UpdateState::Error { error, retry, .. } => {
                assert!(matches!(error, UpdateError::ServiceStart(_)));
                controller.service().fail_start.store(false, Ordering::SeqCst);
                retry();
            }
            other => panic!("Expected Error state, got {:?}", other),
        }

        assert!(controller.view_model().state().is_idle());
        assert_eq!(controller.service().starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_dismiss() {
        let controller = create_test_controller(UpdaterConfig::default());
        controller.service().fail_start.store(true, Ordering::SeqCst);
        controller.start();

        controller.view_model().state().cancel();
        assert!(controller.view_model().state().is_idle());
        assert_eq!(controller.service().starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_from_idle_is_immediate() {
        let controller = create_test_controller(UpdaterConfig::default());

        controller.check_for_updates();
        assert_eq!(controller.service().checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_from_stale_flow_waits_for_settle_delay() {
        let controller = create_test_controller(UpdaterConfig::default());
        let cancels = Arc::new(AtomicUsize::new(0));
        let c = cancels.clone();
        controller
            .service()
            .driver
            .show_user_initiated_update_check(callback(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));

        controller.check_for_updates();
        // Repeated requests while settling are coalesced
        controller.check_for_updates();

        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert!(controller.view_model().state().is_idle());
        assert_eq!(controller.service().checks(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.service().checks(), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(controller.service().checks(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(controller.service().checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_after_settled_cancel_is_coalesced() {
        let controller = create_test_controller(UpdaterConfig::default());
        controller
            .service()
            .driver
            .show_update_not_found(callback(|| {}));

        controller.check_for_updates();
        assert!(controller.view_model().state().is_idle());

        // Idle already, but the restart is still waiting out the settle delay
        controller.check_for_updates();
        controller.check_for_updates();
        assert_eq!(controller.service().checks(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(controller.service().checks(), 1);

        // Once the restart went out, a check from idle is immediate again
        controller.check_for_updates();
        assert_eq!(controller.service().checks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_from_download_cancels_download() {
        let controller = create_test_controller(UpdaterConfig::default());
        let driver = controller.service().driver.clone();
        driver.show_download_initiated(callback(|| {}));
        driver.show_download_received_data(100);

        controller.check_for_updates();
        assert!(controller.view_model().state().is_idle());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(controller.service().checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_idle_checks_once_settled() {
        let config = UpdaterConfig {
            settle_strategy: SettleMode::WaitForIdle,
            settle_delay_ms: 500,
            ..Default::default()
        };
        let controller = create_test_controller(config);

        // Cancellation settles later, as a real service would
        let view_model = controller.view_model().downgrade();
        controller.view_model().set_state(UpdateState::Checking {
            cancel: callback(move || {
                let view_model = view_model.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    view_model.set_state(UpdateState::Idle);
                });
            }),
        });

        controller.check_for_updates();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.service().checks(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.service().checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_idle_gives_up_after_timeout() {
        let config = UpdaterConfig {
            settle_strategy: SettleMode::WaitForIdle,
            settle_delay_ms: 200,
            ..Default::default()
        };
        let controller = create_test_controller(config);
        controller.view_model().set_state(UpdateState::Checking {
            cancel: callback(|| {}),
        });

        controller.check_for_updates();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(controller.service().checks(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.service().checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_install_runs_to_installing() {
        let controller = create_test_controller(UpdaterConfig::default());
        let driver = controller.service().driver.clone();

        controller.service().found("1.3.0");
        controller.install_update();
        assert!(controller.is_force_installing());
        assert_eq!(
            *controller.service().choices.lock(),
            vec![UpdateChoice::Install]
        );

        driver.show_download_initiated(callback(|| {}));
        tokio::time::sleep(Duration::from_millis(1)).await;
        driver.show_download_expected_length(1000);
        driver.show_download_received_data(1000);
        tokio::time::sleep(Duration::from_millis(1)).await;
        driver.show_extraction_started();
        driver.show_extraction_progress(1.0);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(controller.is_force_installing());

        driver.show_ready_to_install(reply(|_: UpdateChoice| {}));
        driver.show_installing(false, callback(|| {}));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(controller.view_model().kind(), UpdateStateKind::Installing);
        assert!(!controller.is_force_installing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_install_is_noop_when_not_installable() {
        let controller = create_test_controller(UpdaterConfig::default());

        controller.install_update();
        assert!(!controller.is_force_installing());

        controller
            .service()
            .driver
            .show_user_initiated_update_check(callback(|| {}));
        controller.install_update();
        assert!(!controller.is_force_installing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_during_force_install_stops_loop() {
        let controller = create_test_controller(UpdaterConfig::default());
        controller.service().found("1.3.0");
        controller.install_update();
        controller
            .service()
            .driver
            .show_download_initiated(callback(|| {}));

        controller.check_for_updates();
        assert!(!controller.is_force_installing());
        assert!(controller.view_model().state().is_idle());

        // A later update found is not confirmed by the stale loop
        tokio::time::sleep(Duration::from_millis(150)).await;
        controller.service().found("1.4.0");
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            *controller.service().choices.lock(),
            vec![UpdateChoice::Install]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_retry_requests_new_check() {
        let controller = create_test_controller(UpdaterConfig::default());
        controller
            .service()
            .driver
            .show_updater_error(
                UpdateError::Service("feed unreachable".to_string()),
                callback(|| {}),
            );

        controller.view_model().state().cancel();
        assert_eq!(controller.service().checks(), 0);

        controller
            .service()
            .driver
            .show_updater_error(
                UpdateError::Service("feed unreachable".to_string()),
                callback(|| {}),
            );
        match controller.view_model().state() {
            UpdateState::Error { retry, .. } => retry(),
            other => panic!("Expected Error state, got {:?}", other),
        }
        assert_eq!(controller.service().checks(), 1);
    }

    #[test]
    fn test_with_defaults_loads_config() {
        let controller = UpdateController::with_defaults(|driver, config| {
            assert!(!config.feed_url.is_empty());
            MockService::new(driver)
        });

        assert!(controller.view_model().state().is_idle());
        assert!(!controller.config().channel.is_empty());
    }

    #[test]
    fn test_validate_menu_item() {
        let controller = create_test_controller(UpdaterConfig::default());
        assert!(controller.validate_menu_item(MenuAction::CheckForUpdates));

        controller.service().can_check.store(false, Ordering::SeqCst);
        assert!(!controller.validate_menu_item(MenuAction::CheckForUpdates));
        assert!(controller.validate_menu_item(MenuAction::Other));
        assert!(controller.validate_menu_item(MenuAction::InstallUpdate));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_clears_force_install() {
        let controller = create_test_controller(UpdaterConfig::default());
        controller.service().found("1.3.0");
        controller.install_update();
        assert!(controller.is_force_installing());

        controller.teardown();
        assert!(!controller.is_force_installing());
    }
}
