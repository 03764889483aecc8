pub mod state;

pub use state::{
    OPENAI_API_KEY_ENV, ProviderSettings, SettingsCredentials, SettingsError, SettingsStore,
};
