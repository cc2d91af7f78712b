//! services/api/src/adapters/prompt_llm.rs
//!
//! This module contains the adapter for the prompt-generating LLM.
//! It implements the `LanguageModelService` port from the `core` crate with an
//! OpenAI-compatible chat-completion call whose response format is the JSON
//! Schema carried by the request.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use clipfeed_core::llm::{LlmConfig, LlmError, LlmRequest, LlmResult};
use clipfeed_core::ports::LanguageModelService;
use tracing::{debug, warn};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `LanguageModelService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiPromptAdapter {
    client: Client<OpenAIConfig>,
}

impl OpenAiPromptAdapter {
    /// Creates an adapter whose client talks to `config.endpoint` with `config.api_key`.
    pub fn new(config: &LlmConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_base(&config.endpoint);
        if let Some(key) = &config.api_key {
            openai_config = openai_config.with_api_key(key);
        }
        Self {
            client: Client::with_config(openai_config),
        }
    }

    fn build_messages(request: &LlmRequest) -> LlmResult<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = &request.system_prompt {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt.as_str())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt.as_str())
                .build()
                .map_err(map_openai_error)?
                .into(),
        );
        Ok(messages)
    }

    fn response_format(request: &LlmRequest) -> LlmResult<ResponseFormat> {
        let schema: serde_json::Value = serde_json::from_str(request.schema).map_err(|e| {
            LlmError::RequestEncoding(format!("schema '{}' is not JSON: {}", request.schema_name, e))
        })?;
        Ok(ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: request.schema_name.to_string(),
                schema: Some(schema),
                strict: Some(false),
            },
        })
    }
}

/// Sorts an `OpenAIError` into the language-model error taxonomy.
fn map_openai_error(error: OpenAIError) -> LlmError {
    match error {
        OpenAIError::ApiError(api) => {
            if api.code.as_deref() == Some("invalid_api_key") {
                LlmError::InvalidCredential
            } else {
                LlmError::Api(api.message)
            }
        }
        OpenAIError::InvalidArgument(msg) => LlmError::RequestEncoding(msg),
        OpenAIError::JSONDeserialize(..) => LlmError::ResponseDecoding(error.to_string()),
        other => LlmError::System(other.to_string()),
    }
}

//=========================================================================================
// `LanguageModelService` Trait Implementation
//=========================================================================================

#[async_trait]
impl LanguageModelService for OpenAiPromptAdapter {
    /// Sends one schema-constrained chat completion and returns the message text.
    async fn complete(&self, config: &LlmConfig, request: &LlmRequest) -> LlmResult<String> {
        if config
            .api_key
            .as_deref()
            .map_or(true, |key| key.trim().is_empty())
        {
            return Err(LlmError::InvalidCredential);
        }

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&config.model)
            .messages(Self::build_messages(request)?)
            .response_format(Self::response_format(request)?)
            .max_tokens(config.max_tokens)
            .temperature(config.temperature)
            .n(1)
            .build()
            .map_err(map_openai_error)?;

        debug!(model = %config.model, schema = request.schema_name, "Sending prompt-generation request");

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| {
                let mapped = map_openai_error(e);
                warn!(error = %mapped, "Prompt-generation request failed");
                mapped
            })?;

        // Extract the text content from the first choice in the response.
        let content = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| {
                LlmError::ResponseDecoding("the model returned no choices".to_string())
            })?
            .message
            .content
            .ok_or_else(|| {
                LlmError::ResponseDecoding("the model's reply contained no text content".to_string())
            })?;
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use clipfeed_core::schema::GenerationMode;

    fn config(api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            model: "gpt-4o-mini".into(),
            endpoint: "http://127.0.0.1:9".into(),
            api_key: api_key.map(str::to_string),
            max_tokens: 64,
            temperature: 0.5,
        }
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let adapter = OpenAiPromptAdapter::new(&config(None));
        let request = LlmRequest::for_mode(GenerationMode::Random, "anything");
        assert_matches!(
            adapter.complete(&config(None), &request).await,
            Err(LlmError::InvalidCredential)
        );
        assert_matches!(
            adapter.complete(&config(Some("   ")), &request).await,
            Err(LlmError::InvalidCredential)
        );
    }

    #[test]
    fn response_format_carries_the_registry_schema() {
        let request = LlmRequest::for_mode(GenerationMode::Mutation, "mutate");
        let format = OpenAiPromptAdapter::response_format(&request).unwrap();
        assert_matches!(format, ResponseFormat::JsonSchema { json_schema } => {
            assert_eq!(json_schema.name, "prompt_evolution");
            assert!(json_schema.schema.unwrap()["properties"]["mutatedPrompts"].is_object());
        });
    }

    #[test]
    fn system_prompt_is_optional() {
        let bare = LlmRequest::for_mode(GenerationMode::Random, "go");
        assert_eq!(OpenAiPromptAdapter::build_messages(&bare).unwrap().len(), 1);

        let with_system = bare.with_system_prompt("you write prompts");
        assert_eq!(OpenAiPromptAdapter::build_messages(&with_system).unwrap().len(), 2);
    }

    #[test]
    fn invalid_arguments_are_encoding_errors() {
        assert_matches!(
            map_openai_error(OpenAIError::InvalidArgument("bad temperature".into())),
            LlmError::RequestEncoding(msg) if msg == "bad temperature"
        );
    }
}
