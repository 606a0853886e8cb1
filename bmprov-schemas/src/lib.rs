pub mod cli_models;
pub mod install_models;
pub mod inventory;
pub mod settings;

pub const BMPROV_SETTINGS_FOLDER: &str = "/var/lib/bmprov/";
