use std::path::PathBuf;
use bmprov_schemas::BMPROV_SETTINGS_FOLDER;

pub mod orchestration;
pub mod registry;
pub mod topology;
pub mod power;
pub mod install;
pub mod progress;
pub mod reachability;
pub mod host_sm;
pub mod scheduler;
pub mod upgrade;
pub mod software;

#[cfg(test)]
pub mod test_support;

/// Settings folder given on the command line, or the default one
pub fn settings_folder(custom: Option<String>) -> PathBuf {
    match custom {
        Some(folder) => PathBuf::from(folder),
        None => PathBuf::from(BMPROV_SETTINGS_FOLDER),
    }
}
