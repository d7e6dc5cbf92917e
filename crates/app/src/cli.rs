//! Command-line surface of the `autoscript` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Streaming test-plan assistant for the terminal
#[derive(Parser, Debug)]
#[command(name = "autoscript")]
#[command(about = "AutoScript: turn a URL and a user flow into a streamed QA test plan")]
#[command(version)]
pub struct Cli {
    /// Settings file; login state is kept next to it
    #[arg(long, global = true, env = "AUTOSCRIPT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enter the workspace
    Login(LoginArgs),
    /// Leave the workspace
    Logout,
    /// Start an interactive chat session
    Chat(ChatArgs),
    /// Inspect or change provider settings
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(clap::Args, Debug)]
pub struct LoginArgs {
    #[arg(short, long)]
    pub username: String,

    #[arg(short, long)]
    pub password: String,
}

#[derive(clap::Args, Debug)]
pub struct ChatArgs {
    /// Answer with the local echo provider instead of a remote model
    #[arg(long)]
    pub offline: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective settings with the API key masked
    Show,
    /// Persist new values; omitted flags keep their current value
    Set(ConfigSetArgs),
}

#[derive(clap::Args, Debug, Default)]
pub struct ConfigSetArgs {
    #[arg(long)]
    pub provider: Option<String>,

    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long)]
    pub endpoint: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub temperature: Option<f64>,

    #[arg(long)]
    pub max_tokens: Option<u64>,

    /// Google Search grounding for Gemini
    #[arg(long)]
    pub search_grounding: Option<bool>,
}

impl ConfigSetArgs {
    pub fn apply(self, settings: &mut crate::settings::ProviderSettings) {
        if let Some(provider) = self.provider {
            settings.provider_id = provider;
        }
        if let Some(api_key) = self.api_key {
            settings.api_key = api_key;
        }
        if let Some(endpoint) = self.endpoint {
            settings.endpoint = endpoint;
        }
        if let Some(model) = self.model {
            settings.model_name = model;
        }
        if let Some(temperature) = self.temperature {
            settings.temperature = Some(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            settings.max_tokens = Some(max_tokens);
        }
        if let Some(search_grounding) = self.search_grounding {
            settings.search_grounding = search_grounding;
        }
    }
}
