//! Remote model collaborators for the chat core.
//!
//! A provider turns one [`StreamRequest`] into a [`ProviderStreamHandle`]: a channel-backed
//! [`FragmentStream`] plus a worker future the caller must spawn.

use std::sync::Arc;

mod provider;
mod rig_adapter;
mod scripted;

pub use provider::{
    DEFAULT_GEMINI_MODEL, DEFAULT_TEMPERATURE, FragmentStream, HistoryRole,
    HistoryTurn, LlmProvider, ProviderConfig, ProviderError, ProviderResult,
    ProviderStreamHandle, ProviderWorker, StreamEvent, StreamEventPayload, StreamRequest,
    StreamTarget,
};
pub use rig_adapter::{
    DEFAULT_OPENAI_MODEL, RIG_GEMINI_PROVIDER_ID, RIG_OPENAI_PROVIDER_ID, RigProviderAdapter,
};
pub use scripted::{SCRIPTED_MODEL, SCRIPTED_PROVIDER_ID, Script, ScriptStep, ScriptedProvider};

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_GEMINI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "gemini" | "google" => {
            config.provider_id = RIG_GEMINI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config)?))
        }
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config)?))
        }
        SCRIPTED_PROVIDER_ID => Ok(Arc::new(ScriptedProvider::new())),
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_provider_id_defaults_to_gemini() {
        let provider = create_provider(ProviderConfig::new("", "key", "")).expect("provider");
        assert_eq!(provider.id(), RIG_GEMINI_PROVIDER_ID);
    }

    #[test]
    fn scripted_provider_needs_no_key() {
        let provider = create_provider(ProviderConfig::new("scripted", "", "")).expect("provider");
        assert_eq!(provider.default_model(), SCRIPTED_MODEL);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = create_provider(ProviderConfig::new("mystery", "key", ""));
        assert!(matches!(
            result,
            Err(ProviderError::UnsupportedProvider { .. })
        ));
    }
}
