// Update Simulator - scripted driver of the update state machine
// Reproduces every legal path with local timers only; no network or install activity

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::update::{
    callback, reply, AppcastItem, Callback, PermissionRequest, UpdateChoice, UpdateError,
    UpdateState, UpdateViewModel,
};

/// Time spent in `checking` before a result arrives
const CHECK_DURATION: Duration = Duration::from_secs(2);

/// How long `notFound` stays visible before reverting to idle
const NOT_FOUND_LINGER: Duration = Duration::from_secs(3);

/// When the "cancel during checking" scenario gives up
const CANCEL_CHECK_AFTER: Duration = Duration::from_secs(1);

/// Interval between extraction progress steps
const EXTRACT_INTERVAL: Duration = Duration::from_millis(300);

/// Number of extraction steps (progress advances by 1/steps)
const EXTRACT_STEPS: u32 = 5;

/// Canned scenarios, one per path through the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    HappyPath,
    NotFound,
    Error,
    SlowDownload,
    PermissionRequest,
    CancelDuringDownload,
    CancelDuringChecking,
    Installing,
    AutoUpdate,
}

impl Scenario {
    pub const ALL: [Scenario; 9] = [
        Scenario::HappyPath,
        Scenario::NotFound,
        Scenario::Error,
        Scenario::SlowDownload,
        Scenario::PermissionRequest,
        Scenario::CancelDuringDownload,
        Scenario::CancelDuringChecking,
        Scenario::Installing,
        Scenario::AutoUpdate,
    ];
}

/// What happens once the simulated download has run its steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterDownload {
    Extract,
    Cancel,
}

#[derive(Debug, Clone, Copy)]
struct DownloadPlan {
    steps: u32,
    chunk: u64,
    total: u64,
    interval: Duration,
    then: AfterDownload,
}

impl DownloadPlan {
    const NORMAL: DownloadPlan = DownloadPlan {
        steps: 10,
        chunk: 100,
        total: 1000,
        interval: Duration::from_millis(300),
        then: AfterDownload::Extract,
    };

    const SLOW: DownloadPlan = DownloadPlan {
        steps: 20,
        chunk: 100,
        total: 2000,
        interval: Duration::from_millis(500),
        then: AfterDownload::Extract,
    };

    const CANCELLED: DownloadPlan = DownloadPlan {
        steps: 5,
        chunk: 100,
        total: 1000,
        interval: Duration::from_millis(300),
        then: AfterDownload::Cancel,
    };
}

#[derive(Debug, Clone, Copy)]
enum CheckOutcome {
    Available(DownloadPlan),
    NotFound,
    Error,
}

struct SimulatorInner {
    view_model: UpdateViewModel,
    /// Bumped whenever a flow starts or ends; timers and callbacks of an
    /// older epoch are ignored
    epoch: AtomicU64,
}

/// Timer-driven stand-in for the update service
#[derive(Clone)]
pub struct UpdateSimulator {
    inner: Arc<SimulatorInner>,
}

impl Default for UpdateSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateSimulator {
    pub fn new() -> Self {
        Self::with_view_model(UpdateViewModel::new())
    }

    pub fn with_view_model(view_model: UpdateViewModel) -> Self {
        Self {
            inner: Arc::new(SimulatorInner {
                view_model,
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn view_model(&self) -> &UpdateViewModel {
        &self.inner.view_model
    }

    /// Run a scenario, superseding whatever flow was running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn simulate(&self, scenario: Scenario) {
        log::info!("[UpdateSimulator] Simulating {:?}", scenario);
        let epoch = self.inner.begin();
        let inner = &self.inner;

        match scenario {
            Scenario::HappyPath => {
                SimulatorInner::check(inner, epoch, CheckOutcome::Available(DownloadPlan::NORMAL))
            }
            Scenario::NotFound => SimulatorInner::check(inner, epoch, CheckOutcome::NotFound),
            Scenario::Error => SimulatorInner::check(inner, epoch, CheckOutcome::Error),
            Scenario::SlowDownload => {
                SimulatorInner::check(inner, epoch, CheckOutcome::Available(DownloadPlan::SLOW))
            }
            Scenario::PermissionRequest => SimulatorInner::permission_request(inner, epoch),
            Scenario::CancelDuringDownload => SimulatorInner::check(
                inner,
                epoch,
                CheckOutcome::Available(DownloadPlan::CANCELLED),
            ),
            Scenario::CancelDuringChecking => SimulatorInner::cancelled_check(inner, epoch),
            Scenario::Installing => SimulatorInner::installing(inner, epoch, false),
            Scenario::AutoUpdate => SimulatorInner::installing(inner, epoch, true),
        }
    }

    /// End the running flow and return to idle
    pub fn reset(&self) {
        self.inner.begin();
        self.inner.view_model.set_state(UpdateState::Idle);
    }
}

fn sample_item() -> AppcastItem {
    AppcastItem {
        version: "1.2.0".to_string(),
        display_version: "1.2.0".to_string(),
        published_at: Some("2025-01-15T10:30:00Z".to_string()),
        content_length: Some(DownloadPlan::NORMAL.total),
        release_notes_url: None,
        download_url: Some("https://example.com/releases/1.2.0/update.dmg".to_string()),
        critical: false,
    }
}

impl SimulatorInner {
    fn begin(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn set_state(&self, epoch: u64, state: UpdateState) {
        if self.is_current(epoch) {
            self.view_model.set_state(state);
        }
    }

    /// Close the flow and go idle, unless it was already superseded
    fn finish(&self, epoch: u64) {
        if self
            .epoch
            .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.view_model.set_state(UpdateState::Idle);
        }
    }

    fn finish_callback(this: &Arc<Self>, epoch: u64) -> Callback {
        let weak = Arc::downgrade(this);
        callback(move || {
            if let Some(inner) = weak.upgrade() {
                inner.finish(epoch);
            }
        })
    }

    /// Run `step` after `delay` if the flow is still current
    fn schedule<F>(this: &Arc<Self>, epoch: u64, delay: Duration, step: F)
    where
        F: FnOnce(&Arc<Self>) + Send + 'static,
    {
        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                if inner.is_current(epoch) {
                    step(&inner);
                }
            }
        });
    }

    fn check(this: &Arc<Self>, epoch: u64, outcome: CheckOutcome) {
        this.set_state(
            epoch,
            UpdateState::Checking {
                cancel: Self::finish_callback(this, epoch),
            },
        );

        Self::schedule(this, epoch, CHECK_DURATION, move |inner| match outcome {
            CheckOutcome::Available(plan) => Self::update_available(inner, epoch, plan),
            CheckOutcome::NotFound => {
                inner.set_state(
                    epoch,
                    UpdateState::NotFound {
                        acknowledgement: Self::finish_callback(inner, epoch),
                    },
                );
                Self::schedule(inner, epoch, NOT_FOUND_LINGER, move |inner| {
                    inner.finish(epoch)
                });
            }
            CheckOutcome::Error => Self::error(inner, epoch),
        });
    }

    fn update_available(this: &Arc<Self>, epoch: u64, plan: DownloadPlan) {
        let weak: Weak<Self> = Arc::downgrade(this);
        this.set_state(
            epoch,
            UpdateState::UpdateAvailable {
                item: sample_item(),
                reply: reply(move |choice: UpdateChoice| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if !inner.is_current(epoch) {
                        return;
                    }
                    match choice {
                        UpdateChoice::Install => Self::download(&inner, epoch, plan),
                        UpdateChoice::Skip | UpdateChoice::Dismiss => inner.finish(epoch),
                    }
                }),
            },
        );
    }

    fn error(this: &Arc<Self>, epoch: u64) {
        let weak: Weak<Self> = Arc::downgrade(this);
        this.set_state(
            epoch,
            UpdateState::Error {
                error: UpdateError::Service("Simulated update failure".to_string()),
                retry: callback(move || {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if inner.is_current(epoch) {
                        let retry_epoch = inner.begin();
                        Self::check(
                            &inner,
                            retry_epoch,
                            CheckOutcome::Available(DownloadPlan::NORMAL),
                        );
                    }
                }),
                dismiss: Self::finish_callback(this, epoch),
            },
        );
    }

    fn permission_request(this: &Arc<Self>, epoch: u64) {
        let weak: Weak<Self> = Arc::downgrade(this);
        this.set_state(
            epoch,
            UpdateState::PermissionRequest {
                request: PermissionRequest {
                    system_profile: vec![
                        ("os".to_string(), std::env::consts::OS.to_string()),
                        ("arch".to_string(), std::env::consts::ARCH.to_string()),
                    ],
                },
                reply: reply(move |automatic_checks: bool| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if !inner.is_current(epoch) {
                        return;
                    }
                    if automatic_checks {
                        let check_epoch = inner.begin();
                        Self::check(
                            &inner,
                            check_epoch,
                            CheckOutcome::Available(DownloadPlan::NORMAL),
                        );
                    } else {
                        inner.finish(epoch);
                    }
                }),
            },
        );
    }

    fn cancelled_check(this: &Arc<Self>, epoch: u64) {
        this.set_state(
            epoch,
            UpdateState::Checking {
                cancel: Self::finish_callback(this, epoch),
            },
        );
        Self::schedule(this, epoch, CANCEL_CHECK_AFTER, move |inner| {
            inner.finish(epoch)
        });
    }

    fn download(this: &Arc<Self>, epoch: u64, plan: DownloadPlan) {
        let cancel = Self::finish_callback(this, epoch);
        // Length is unknown until the first chunk arrives
        this.set_state(
            epoch,
            UpdateState::Downloading {
                cancel: cancel.clone(),
                expected_length: None,
                progress: 0,
            },
        );

        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            for step in 1..=plan.steps {
                tokio::time::sleep(plan.interval).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.is_current(epoch) {
                    return;
                }
                inner.set_state(
                    epoch,
                    UpdateState::Downloading {
                        cancel: cancel.clone(),
                        expected_length: Some(plan.total),
                        progress: u64::from(step) * plan.chunk,
                    },
                );
            }

            if plan.then == AfterDownload::Cancel {
                tokio::time::sleep(plan.interval).await;
                log::info!("[UpdateSimulator] Cancelling download");
                cancel();
                return;
            }

            for step in 1..=EXTRACT_STEPS {
                tokio::time::sleep(EXTRACT_INTERVAL).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.is_current(epoch) {
                    return;
                }
                inner.set_state(
                    epoch,
                    UpdateState::Extracting {
                        progress: f64::from(step) / f64::from(EXTRACT_STEPS),
                        cancel: cancel.clone(),
                    },
                );
            }

            tokio::time::sleep(EXTRACT_INTERVAL).await;
            if let Some(inner) = weak.upgrade() {
                if inner.is_current(epoch) {
                    Self::installing(&inner, epoch, false);
                }
            }
        });
    }

    fn installing(this: &Arc<Self>, epoch: u64, is_auto_update: bool) {
        this.set_state(
            epoch,
            UpdateState::Installing {
                is_auto_update,
                retry_terminating_application: callback(|| {
                    log::info!("[UpdateSimulator] Relaunch requested, nothing to terminate");
                }),
                dismiss: Self::finish_callback(this, epoch),
            },
        );
    }
}
