pub mod update;

pub use update::{
    Scenario, UpdateController, UpdateService, UpdateSimulator, UpdateState, UpdateViewModel,
    UpdaterConfig,
};
