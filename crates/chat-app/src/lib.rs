pub mod app;
pub mod capture;
pub mod chat;
pub mod settings;

pub use app::{AppError, AppResult, ChatApp, run_terminal};
pub use capture::{CaptureError, CaptureResult, ScreencaptureCommand, ScreenshotCapture};
pub use chat::{ChatController, ChatUpdate, ControllerError, ControllerEvent, SendOutcome};
pub use settings::{ProviderSettings, SettingsError, SettingsStore};
