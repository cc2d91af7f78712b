//! crates/clipfeed_core/src/prompts.rs
//!
//! Builds prompt-generation requests for each generation mode, sends them
//! through the `LanguageModelService` port and turns the schema-shaped reply
//! into `PromptGeneration` values.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::{GeneratedPrompt, PromptGeneration};
use crate::llm::{decode, LlmConfig, LlmError, LlmRequest, LlmResponse, LlmResult, RetryPolicy};
use crate::ports::LanguageModelService;
use crate::schema::GenerationMode;

const SYSTEM_INSTRUCTIONS: &str = r#"You write prompts for an image and short-video generator.

Every prompt you write must:
- describe one concrete, visual scene in a single sentence or two,
- name a subject, a setting and a visual style (lighting, palette, camera or medium),
- avoid real people, brands, text overlays and anything unsafe for a general audience.

Reply ONLY with JSON that matches the response schema. No markdown, no commentary."#;

//=========================================================================================
// Wire Types (LLM reply shapes)
//=========================================================================================

#[derive(Debug, Deserialize)]
struct PromptItem {
    prompt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutatedItem {
    prompt: String,
    parent_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrossoverItem {
    prompt: String,
    parent_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvolutionReply {
    mutated_prompts: Option<Vec<MutatedItem>>,
    crossover_prompts: Option<Vec<CrossoverItem>>,
}

//=========================================================================================
// Parent Prompts
//=========================================================================================

/// A prior prompt offered to the model as material for mutation or crossover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentPrompt {
    pub id: String,
    pub prompt: String,
}

impl From<&GeneratedPrompt> for ParentPrompt {
    fn from(generated: &GeneratedPrompt) -> Self {
        Self {
            id: generated.id.to_string(),
            prompt: generated.generation.prompt().to_string(),
        }
    }
}

//=========================================================================================
// The Generator
//=========================================================================================

pub struct PromptGenerator {
    llm: Arc<dyn LanguageModelService>,
    config: LlmConfig,
    retry: RetryPolicy,
}

impl PromptGenerator {
    pub fn new(llm: Arc<dyn LanguageModelService>, config: LlmConfig) -> Self {
        Self {
            llm,
            config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Generates prompts tailored to the prompts behind videos the user liked or saved.
    pub async fn from_profile(
        &self,
        taste: &[String],
        count: usize,
    ) -> LlmResult<LlmResponse<Vec<PromptGeneration>>> {
        if taste.is_empty() {
            return Err(LlmError::RequestEncoding(
                "a profile request needs at least one prompt the user enjoyed".to_string(),
            ));
        }
        let listed = taste
            .iter()
            .map(|p| format!("- {}", p))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "The user enjoyed videos generated from these prompts:\n{}\n\n\
             Infer what they like (subjects, moods, styles) and write {} new prompts they would \
             enjoy. Do not repeat the prompts above.",
            listed, count
        );
        self.generate_list(GenerationMode::Profile, prompt).await
    }

    /// Generates varied prompts with no knowledge of the user, for exploration.
    pub async fn random(&self, count: usize) -> LlmResult<LlmResponse<Vec<PromptGeneration>>> {
        let prompt = format!(
            "Write {} prompts that are as different from each other as possible in subject, \
             setting and style.",
            count
        );
        self.generate_list(GenerationMode::Random, prompt).await
    }

    /// Generates one variation per parent, each keeping its parent's id.
    pub async fn mutate(
        &self,
        parents: &[ParentPrompt],
    ) -> LlmResult<LlmResponse<Vec<PromptGeneration>>> {
        if parents.is_empty() {
            return Err(LlmError::RequestEncoding(
                "a mutation needs at least one parent prompt".to_string(),
            ));
        }
        let prompt = format!(
            "Mutate each of these prompts: keep its core idea but change one or two elements \
             (subject detail, setting, lighting or style). Return one mutated prompt per parent \
             in `mutatedPrompts`, with `parentId` set to the parent's id.\n\n{}",
            list_parents(parents)
        );
        let raw = self
            .send(&LlmRequest::for_mode(GenerationMode::Mutation, prompt)
                .with_system_prompt(SYSTEM_INSTRUCTIONS))
            .await?;
        let reply: LlmResponse<EvolutionReply> = decode(&raw)?;
        let known = known_ids(parents);

        let items = reply.value.mutated_prompts.ok_or_else(|| {
            LlmError::ResponseDecoding("the reply has no `mutatedPrompts` array".to_string())
        })?;
        require_items(&items, "mutatedPrompts")?;
        let mut generations = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let text = non_empty(item.prompt, index)?;
            if !known.contains(item.parent_id.as_str()) {
                return Err(LlmError::ResponseDecoding(format!(
                    "mutated prompt {} names unknown parent '{}'",
                    index, item.parent_id
                )));
            }
            generations.push(PromptGeneration::mutation(text, item.parent_id));
        }
        info!(count = generations.len(), "Decoded mutated prompts");
        Ok(LlmResponse {
            value: generations,
            raw: reply.raw,
        })
    }

    /// Generates prompts that blend two or more of the given parents.
    pub async fn crossover(
        &self,
        parents: &[ParentPrompt],
        count: usize,
    ) -> LlmResult<LlmResponse<Vec<PromptGeneration>>> {
        if parents.len() < 2 {
            return Err(LlmError::RequestEncoding(
                "a crossover needs at least two parent prompts".to_string(),
            ));
        }
        let prompt = format!(
            "Write {} new prompts, each combining the strongest elements of two or more of these \
             prompts. Return them in `crossoverPrompts`, with `parentIds` listing the ids of the \
             prompts each one combines.\n\n{}",
            count,
            list_parents(parents)
        );
        let raw = self
            .send(&LlmRequest::for_mode(GenerationMode::Crossover, prompt)
                .with_system_prompt(SYSTEM_INSTRUCTIONS))
            .await?;
        let reply: LlmResponse<EvolutionReply> = decode(&raw)?;
        let known = known_ids(parents);

        let items = reply.value.crossover_prompts.ok_or_else(|| {
            LlmError::ResponseDecoding("the reply has no `crossoverPrompts` array".to_string())
        })?;
        require_items(&items, "crossoverPrompts")?;
        let mut generations = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let text = non_empty(item.prompt, index)?;
            if let Some(unknown) = item.parent_ids.iter().find(|id| !known.contains(id.as_str())) {
                return Err(LlmError::ResponseDecoding(format!(
                    "crossover prompt {} names unknown parent '{}'",
                    index, unknown
                )));
            }
            if item.parent_ids.iter().collect::<HashSet<_>>().len() < 2 {
                return Err(LlmError::ResponseDecoding(format!(
                    "crossover prompt {} does not combine two distinct parents",
                    index
                )));
            }
            let generation = PromptGeneration::crossover(text, item.parent_ids)
                .map_err(|e| LlmError::ResponseDecoding(format!("crossover prompt {}: {}", index, e)))?;
            generations.push(generation);
        }
        info!(count = generations.len(), "Decoded crossover prompts");
        Ok(LlmResponse {
            value: generations,
            raw: reply.raw,
        })
    }

    async fn generate_list(
        &self,
        mode: GenerationMode,
        prompt: String,
    ) -> LlmResult<LlmResponse<Vec<PromptGeneration>>> {
        let raw = self
            .send(&LlmRequest::for_mode(mode, prompt).with_system_prompt(SYSTEM_INSTRUCTIONS))
            .await?;
        let reply: LlmResponse<Vec<PromptItem>> = decode(&raw)?;
        require_items(&reply.value, "prompt list")?;
        let generations = reply
            .value
            .into_iter()
            .enumerate()
            .map(|(index, item)| non_empty(item.prompt, index).map(PromptGeneration::new))
            .collect::<LlmResult<Vec<_>>>()?;
        info!(mode = mode.as_str(), count = generations.len(), "Decoded prompts");
        Ok(LlmResponse {
            value: generations,
            raw: reply.raw,
        })
    }

    /// Sends a request, retrying transport failures with exponential backoff.
    async fn send(&self, request: &LlmRequest) -> LlmResult<String> {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 1u32;
        loop {
            match self.llm.complete(&self.config, request).await {
                Ok(raw) => return Ok(raw),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Language model call failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    delay = self.retry.next_delay(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn list_parents(parents: &[ParentPrompt]) -> String {
    parents
        .iter()
        .map(|p| format!("id: {}\nprompt: {}", p.id, p.prompt))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn known_ids(parents: &[ParentPrompt]) -> HashSet<&str> {
    parents.iter().map(|p| p.id.as_str()).collect()
}

fn require_items<T>(items: &[T], field: &str) -> LlmResult<()> {
    if items.is_empty() {
        return Err(LlmError::ResponseDecoding(format!("the {} is empty", field)));
    }
    Ok(())
}

fn non_empty(prompt: String, index: usize) -> LlmResult<String> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(LlmError::ResponseDecoding(format!("prompt {} is empty", index)));
    }
    Ok(trimmed.to_string())
}
