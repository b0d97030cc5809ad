// Auto-Update Lifecycle Module
// A single observable state value, driven either by the real update service
// (UpdateController) or by timers (UpdateSimulator)

mod types;
mod config;
mod view_model;
mod install_loop;
mod driver;
mod controller;
mod simulator;
mod release_notes;

// Re-export core types for external use
pub use types::{
    callback,
    reply,
    AppcastItem,
    Callback,
    PermissionRequest,
    Reply,
    StateChangeEvent,
    UpdateChoice,
    UpdateError,
    UpdateState,
    UpdateStateKind,
    UpdateStateSnapshot,
};

// Re-export config functions
pub use config::{
    ensure_config_exists, get_config_path, load_config, load_config_from, save_config,
    save_config_to, SettleMode, SettleStrategy, UpdaterConfig,
};

// Re-export the state container
pub use view_model::{Observer, ObserverId, UpdateViewModel, WeakUpdateViewModel};

// Re-export drivers
pub use install_loop::InstallLoop;
pub use driver::{UpdateDriver, UpdateStage};
pub use controller::{MenuAction, UpdateController, UpdateService};
pub use simulator::{Scenario, UpdateSimulator};

pub use release_notes::ReleaseNotes;
