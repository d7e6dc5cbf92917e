pub mod state;

pub use state::{
    DEFAULT_SYSTEM_INSTRUCTION, ProviderSettings, SettingsError, SettingsResult, SettingsStore,
};
