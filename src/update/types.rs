// Core types for the update lifecycle state machine
// Each variant carries exactly the callbacks needed to advance or abort from that point

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Zero-argument callback embedded in a state (cancel, acknowledge, dismiss, ...)
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Callback that answers a question posed by a state
pub type Reply<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Wrap a closure as a [`Callback`]
pub fn callback<F>(f: F) -> Callback
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`Reply`]
pub fn reply<T, F>(f: F) -> Reply<T>
where
    F: Fn(T) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Answer to an "update available" prompt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateChoice {
    /// Download and install the update
    Install,
    /// Skip this version entirely
    Skip,
    /// Remind later
    Dismiss,
}

/// Metadata describing an available update (one appcast entry)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppcastItem {
    /// Machine version string (e.g., "1.2.0" or a commit hash)
    pub version: String,

    /// Version string shown to the user
    pub display_version: String,

    /// ISO 8601 publication timestamp
    pub published_at: Option<String>,

    /// Size of the update payload in bytes, when the feed declares it
    pub content_length: Option<u64>,

    /// Link to the release notes, when the feed declares one
    pub release_notes_url: Option<String>,

    /// Location of the update payload
    pub download_url: Option<String>,

    /// Whether the feed marks this update as critical
    pub critical: bool,
}

impl AppcastItem {
    pub fn new(version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            display_version: version.clone(),
            version,
            ..Default::default()
        }
    }
}

/// Payload of the first-run consent dialog
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PermissionRequest {
    /// System profile entries the service would like to send along with checks
    pub system_profile: Vec<(String, String)>,
}

/// Update lifecycle state. Exactly one is live at a time; assigning a new one
/// replaces the old one together with its callbacks.
#[derive(Clone)]
pub enum UpdateState {
    /// No activity in progress
    Idle,

    /// A check for updates is in flight
    Checking { cancel: Callback },

    /// The user must choose to proceed or decline
    UpdateAvailable {
        item: AppcastItem,
        reply: Reply<UpdateChoice>,
    },

    /// The check completed without finding an update
    NotFound { acknowledgement: Callback },

    /// The check or the install failed
    Error {
        error: UpdateError,
        retry: Callback,
        dismiss: Callback,
    },

    /// First-run consent for automatic checks
    PermissionRequest {
        request: PermissionRequest,
        reply: Reply<bool>,
    },

    /// The update payload is being transferred
    Downloading {
        cancel: Callback,
        expected_length: Option<u64>,
        progress: u64,
    },

    /// The payload is being unpacked, `progress` in [0.0, 1.0]
    Extracting { progress: f64, cancel: Callback },

    /// Final step; waits for a relaunch or a manual dismissal
    Installing {
        is_auto_update: bool,
        retry_terminating_application: Callback,
        dismiss: Callback,
    },
}

impl Default for UpdateState {
    fn default() -> Self {
        UpdateState::Idle
    }
}

impl UpdateState {
    pub fn kind(&self) -> UpdateStateKind {
        match self {
            UpdateState::Idle => UpdateStateKind::Idle,
            UpdateState::Checking { .. } => UpdateStateKind::Checking,
            UpdateState::UpdateAvailable { .. } => UpdateStateKind::UpdateAvailable,
            UpdateState::NotFound { .. } => UpdateStateKind::NotFound,
            UpdateState::Error { .. } => UpdateStateKind::Error,
            UpdateState::PermissionRequest { .. } => UpdateStateKind::PermissionRequest,
            UpdateState::Downloading { .. } => UpdateStateKind::Downloading,
            UpdateState::Extracting { .. } => UpdateStateKind::Extracting,
            UpdateState::Installing { .. } => UpdateStateKind::Installing,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, UpdateState::Idle)
    }

    /// Whether the state has a forward-progress action short of installing.
    /// Only these states take part in the force-install confirm loop.
    pub fn is_installable(&self) -> bool {
        matches!(
            self,
            UpdateState::UpdateAvailable { .. }
                | UpdateState::NotFound { .. }
                | UpdateState::PermissionRequest { .. }
                | UpdateState::Downloading { .. }
                | UpdateState::Extracting { .. }
        )
    }

    /// Invoke the state's forward action with its "proceed" choice.
    ///
    /// `Downloading` and `Extracting` advance on their own, so confirming them
    /// does nothing. Non-installable states are left untouched.
    pub fn confirm(&self) {
        match self {
            UpdateState::UpdateAvailable { reply, .. } => reply(UpdateChoice::Install),
            UpdateState::NotFound { acknowledgement } => acknowledgement(),
            UpdateState::PermissionRequest { reply, .. } => reply(true),
            UpdateState::Downloading { .. } | UpdateState::Extracting { .. } => {}
            UpdateState::Idle
            | UpdateState::Checking { .. }
            | UpdateState::Error { .. }
            | UpdateState::Installing { .. } => {}
        }
    }

    /// Invoke the state's cancel/dismiss action, steering back toward `Idle`.
    pub fn cancel(&self) {
        match self {
            UpdateState::Idle => {}
            UpdateState::Checking { cancel } => cancel(),
            UpdateState::UpdateAvailable { reply, .. } => reply(UpdateChoice::Dismiss),
            UpdateState::NotFound { acknowledgement } => acknowledgement(),
            UpdateState::Error { dismiss, .. } => dismiss(),
            UpdateState::PermissionRequest { reply, .. } => reply(false),
            UpdateState::Downloading { cancel, .. } => cancel(),
            UpdateState::Extracting { cancel, .. } => cancel(),
            UpdateState::Installing { dismiss, .. } => dismiss(),
        }
    }

    /// Completed fraction for states that report progress
    pub fn progress(&self) -> Option<f64> {
        match self {
            UpdateState::Downloading {
                expected_length: Some(expected),
                progress,
                ..
            } if *expected > 0 => Some((*progress as f64 / *expected as f64).min(1.0)),
            UpdateState::Extracting { progress, .. } => Some(progress.clamp(0.0, 1.0)),
            _ => None,
        }
    }

    /// One-line description for a status item or popover title
    pub fn summary(&self) -> String {
        match self {
            UpdateState::Idle => String::new(),
            UpdateState::Checking { .. } => "Checking for Updates…".to_string(),
            UpdateState::UpdateAvailable { item, .. } => {
                format!("Update Available: {}", item.display_version)
            }
            UpdateState::NotFound { .. } => "No Updates Available".to_string(),
            UpdateState::Error { error, .. } => error.to_string(),
            UpdateState::PermissionRequest { .. } => "Enable Automatic Updates?".to_string(),
            UpdateState::Downloading { .. } => match self.progress() {
                Some(fraction) => format!("Downloading: {:.0}%", fraction * 100.0),
                None => "Downloading…".to_string(),
            },
            UpdateState::Extracting { progress, .. } => {
                format!("Preparing: {:.0}%", progress.clamp(0.0, 1.0) * 100.0)
            }
            UpdateState::Installing { is_auto_update, .. } => {
                if *is_auto_update {
                    "Restart to Complete Update".to_string()
                } else {
                    "Installing…".to_string()
                }
            }
        }
    }

    /// Callback-free copy of the state for observers that only render
    pub fn snapshot(&self) -> UpdateStateSnapshot {
        match self {
            UpdateState::Idle => UpdateStateSnapshot::Idle,
            UpdateState::Checking { .. } => UpdateStateSnapshot::Checking,
            UpdateState::UpdateAvailable { item, .. } => {
                UpdateStateSnapshot::UpdateAvailable { item: item.clone() }
            }
            UpdateState::NotFound { .. } => UpdateStateSnapshot::NotFound,
            UpdateState::Error { error, .. } => UpdateStateSnapshot::Error {
                error: error.clone(),
                recoverable: error.is_recoverable(),
            },
            UpdateState::PermissionRequest { request, .. } => {
                UpdateStateSnapshot::PermissionRequest {
                    request: request.clone(),
                }
            }
            UpdateState::Downloading {
                expected_length,
                progress,
                ..
            } => UpdateStateSnapshot::Downloading {
                expected_length: *expected_length,
                progress: *progress,
            },
            UpdateState::Extracting { progress, .. } => {
                UpdateStateSnapshot::Extracting { progress: *progress }
            }
            UpdateState::Installing { is_auto_update, .. } => UpdateStateSnapshot::Installing {
                is_auto_update: *is_auto_update,
            },
        }
    }
}

impl fmt::Debug for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::Idle => f.write_str("Idle"),
            UpdateState::Checking { .. } => f.write_str("Checking"),
            UpdateState::UpdateAvailable { item, .. } => f
                .debug_struct("UpdateAvailable")
                .field("item", item)
                .finish_non_exhaustive(),
            UpdateState::NotFound { .. } => f.write_str("NotFound"),
            UpdateState::Error { error, .. } => f
                .debug_struct("Error")
                .field("error", error)
                .finish_non_exhaustive(),
            UpdateState::PermissionRequest { request, .. } => f
                .debug_struct("PermissionRequest")
                .field("request", request)
                .finish_non_exhaustive(),
            UpdateState::Downloading {
                expected_length,
                progress,
                ..
            } => f
                .debug_struct("Downloading")
                .field("expected_length", expected_length)
                .field("progress", progress)
                .finish_non_exhaustive(),
            UpdateState::Extracting { progress, .. } => f
                .debug_struct("Extracting")
                .field("progress", progress)
                .finish_non_exhaustive(),
            UpdateState::Installing { is_auto_update, .. } => f
                .debug_struct("Installing")
                .field("is_auto_update", is_auto_update)
                .finish_non_exhaustive(),
        }
    }
}

/// Variant tag of an [`UpdateState`], without payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStateKind {
    Idle,
    Checking,
    UpdateAvailable,
    NotFound,
    Error,
    PermissionRequest,
    Downloading,
    Extracting,
    Installing,
}

impl fmt::Display for UpdateStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateStateKind::Idle => "idle",
            UpdateStateKind::Checking => "checking",
            UpdateStateKind::UpdateAvailable => "update_available",
            UpdateStateKind::NotFound => "not_found",
            UpdateStateKind::Error => "error",
            UpdateStateKind::PermissionRequest => "permission_request",
            UpdateStateKind::Downloading => "downloading",
            UpdateStateKind::Extracting => "extracting",
            UpdateStateKind::Installing => "installing",
        };
        f.pad(name)
    }
}

/// Serializable form of [`UpdateState`] for presentation layers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum UpdateStateSnapshot {
    Idle,
    Checking,
    UpdateAvailable {
        item: AppcastItem,
    },
    NotFound,
    Error {
        error: UpdateError,
        recoverable: bool,
    },
    PermissionRequest {
        request: PermissionRequest,
    },
    Downloading {
        expected_length: Option<u64>,
        progress: u64,
    },
    Extracting {
        progress: f64,
    },
    Installing {
        is_auto_update: bool,
    },
}

/// State change event handed to renderers
#[derive(Debug, Clone, Serialize)]
pub struct StateChangeEvent {
    /// Previous state
    pub previous_state: UpdateStateSnapshot,
    /// New state
    pub new_state: UpdateStateSnapshot,
    /// Milliseconds since UNIX epoch
    pub timestamp: i64,
}

impl StateChangeEvent {
    pub fn new(previous: &UpdateState, new: &UpdateState) -> Self {
        Self {
            previous_state: previous.snapshot(),
            new_state: new.snapshot(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Error types for update operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "message")]
pub enum UpdateError {
    /// The update service could not be started
    ServiceStart(String),

    /// The update service reported a failure while checking, downloading or installing
    Service(String),

    /// The operation was cancelled before it completed
    Cancelled,

    /// Configuration error
    ConfigError(String),

    /// File system error
    FileSystem(String),

    /// Failed to parse a file or payload
    ParseError(String),
}

impl UpdateError {
    /// Whether retrying the failed operation can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, UpdateError::ServiceStart(_) | UpdateError::Service(_))
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::ServiceStart(msg) => {
                write!(f, "Updater could not be started: {}", msg)
            }
            UpdateError::Service(msg) => write!(f, "Update failed: {}", msg),
            UpdateError::Cancelled => write!(f, "Update cancelled"),
            UpdateError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            UpdateError::FileSystem(msg) => write!(f, "File system error: {}", msg),
            UpdateError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for UpdateError {}
