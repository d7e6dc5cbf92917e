use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

/// Persisted login flag. Cosmetic: no credential is ever verified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub is_logged_in: bool,
}

impl AuthState {
    pub fn logged_in(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            is_logged_in: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthStore {
    path: PathBuf,
}

impl AuthStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted state; anything unreadable counts as logged out.
    pub fn load(&self) -> AuthState {
        if !self.path.exists() {
            return AuthState::default();
        }

        let parsed = std::fs::read_to_string(&self.path)
            .map_err(|error| error.to_string())
            .and_then(|raw| serde_json::from_str::<AuthState>(&raw).map_err(|error| error.to_string()));

        match parsed {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(path = ?self.path, error = %error, "discarding unreadable auth state");
                AuthState::default()
            }
        }
    }

    pub fn login(&self, username: &str, password: &str) -> AuthResult<AuthState> {
        ensure!(
            !username.trim().is_empty() && !password.trim().is_empty(),
            CredentialsRequiredSnafu {
                stage: "validate-credentials",
            }
        );

        let state = AuthState::logged_in(username.trim());
        self.save(&state)?;
        tracing::info!(username = %state.username, "logged in");
        Ok(state)
    }

    pub fn logout(&self) -> AuthResult<()> {
        if !self.path.exists() {
            return Ok(());
        }

        std::fs::remove_file(&self.path).context(RemoveFileSnafu {
            stage: "remove-auth-file",
            path: self.path.clone(),
        })?;
        tracing::info!("logged out");
        Ok(())
    }

    fn save(&self, state: &AuthState) -> AuthResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-auth-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string(state).context(SerializeSnafu {
            stage: "serialize-auth-json",
        })?;

        std::fs::write(&self.path, content).context(WriteFileSnafu {
            stage: "write-auth-file",
            path: self.path.clone(),
        })
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AuthError {
    #[snafu(display("Credentials required for workspace entry."))]
    CredentialsRequired { stage: &'static str },
    #[snafu(display("failed to create auth directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize auth state on `{stage}`: {source}"))]
    Serialize {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write auth file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to remove auth file at {path:?} on `{stage}`: {source}"))]
    RemoveFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type AuthResult<T> = Result<T, AuthError>;
