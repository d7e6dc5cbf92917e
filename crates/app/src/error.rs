use snafu::Snafu;

use crate::auth::AuthError;
use crate::settings::SettingsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("settings failed on `{stage}`"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("login failed on `{stage}`"))]
    Auth {
        stage: &'static str,
        source: AuthError,
    },
    #[snafu(display("no model provider available on `{stage}`"))]
    Provider {
        stage: &'static str,
        source: autoscript_llm::ProviderError,
    },
    #[snafu(display("not logged in; run `autoscript login` first"))]
    NotLoggedIn { stage: &'static str },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to render settings on `{stage}`: {source}"))]
    RenderSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;
