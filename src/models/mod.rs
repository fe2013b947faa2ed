pub mod backend_settings;

pub use backend_settings::BackendSettings;
