use std::io::Write;

use snafu::ResultExt;
use tokio::io::BufReader;

use crate::app::AppSession;
use crate::auth::AuthStore;
use crate::cli::{Cli, Commands, ConfigCommand};
use crate::error::{AppResult, AuthSnafu, RenderSettingsSnafu, SettingsSnafu, WriteOutputSnafu};
use crate::settings::SettingsStore;

pub async fn run(cli: Cli) -> AppResult<()> {
    let settings_store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    let auth_store = AuthStore::new(settings_store.auth_path());
    let mut stdout = std::io::stdout();

    match cli.command {
        Commands::Login(args) => {
            let state = auth_store
                .login(&args.username, &args.password)
                .context(AuthSnafu { stage: "login" })?;
            writeln!(stdout, "Logged in as {}.", state.username)
                .context(WriteOutputSnafu { stage: "login" })
        }
        Commands::Logout => {
            auth_store.logout().context(AuthSnafu { stage: "logout" })?;
            writeln!(stdout, "Logged out.").context(WriteOutputSnafu { stage: "logout" })
        }
        Commands::Chat(args) => {
            let settings = settings_store.settings();
            if !args.offline && !settings.is_valid() {
                tracing::warn!(
                    provider_id = %settings.provider_id,
                    "provider settings incomplete; run `autoscript config set`"
                );
            }

            let mut session = AppSession::init(settings, auth_store.load(), args.offline)?;
            session
                .run_chat(BufReader::new(tokio::io::stdin()), &mut stdout)
                .await?;
            let transcript = session.teardown();
            tracing::debug!(messages = transcript.len(), "chat finished");
            Ok(())
        }
        Commands::Config { command } => match command {
            ConfigCommand::Show => {
                let rendered = serde_json::to_string_pretty(&settings_store.settings().redacted())
                    .context(RenderSettingsSnafu { stage: "config-show" })?;
                writeln!(stdout, "{rendered}").context(WriteOutputSnafu { stage: "config-show" })
            }
            ConfigCommand::Set(args) => {
                let mut settings = settings_store.settings().as_ref().clone();
                args.apply(&mut settings);
                settings_store
                    .update(settings)
                    .context(SettingsSnafu { stage: "config-set" })?;
                writeln!(stdout, "Saved settings to {:?}.", settings_store.config_path())
                    .context(WriteOutputSnafu { stage: "config-set" })
            }
        },
    }
}
