//! crates/clipfeed_core/src/profile.rs
//!
//! Builds a user's taste profile from the videos they liked or bookmarked and
//! turns it into new profile-based prompts.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::domain::{GeneratedPrompt, SavedKind};
use crate::ports::{PortResult, ProfileBuilder, PromptStore, SavedVideoStore};
use crate::prompts::PromptGenerator;
use crate::schema::GenerationMode;

/// Prompts generated by the initial profile build.
pub const PROFILE_PROMPT_COUNT: usize = 5;

/// Saved videos per collection that feed the profile.
const TASTE_SAMPLE: usize = 20;

pub struct ProfileService {
    saved: Arc<dyn SavedVideoStore>,
    prompts: Arc<dyn PromptStore>,
    generator: Arc<PromptGenerator>,
}

impl ProfileService {
    pub fn new(
        saved: Arc<dyn SavedVideoStore>,
        prompts: Arc<dyn PromptStore>,
        generator: Arc<PromptGenerator>,
    ) -> Self {
        Self {
            saved,
            prompts,
            generator,
        }
    }

    /// Generates and stores `count` prompts for the user.
    ///
    /// Uses the prompts behind the user's most recent likes and bookmarks; a
    /// user with no usable history gets random exploration prompts instead.
    pub async fn generate_for_user(
        &self,
        user_id: Uuid,
        count: usize,
    ) -> PortResult<Vec<GeneratedPrompt>> {
        let taste = self.taste(user_id).await?;

        let (mode, response) = if taste.is_empty() {
            (
                GenerationMode::Random,
                self.generator.random(count).await?,
            )
        } else {
            (
                GenerationMode::Profile,
                self.generator
                    .from_profile(&taste, count)
                    .await?,
            )
        };

        let saved = self
            .prompts
            .save_generated(user_id, mode, &response.value)
            .await?;
        info!(%user_id, mode = mode.as_str(), taste = taste.len(), count = saved.len(), "Stored generated prompts");
        Ok(saved)
    }

    async fn taste(&self, user_id: Uuid) -> PortResult<Vec<String>> {
        let mut video_ids = Vec::new();
        for kind in [SavedKind::Liked, SavedKind::Bookmarked] {
            let videos = self.saved.list_saved(user_id, kind).await?;
            for video in videos.into_iter().take(TASTE_SAMPLE) {
                if !video_ids.contains(&video.video_id) {
                    video_ids.push(video.video_id);
                }
            }
        }
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.prompts.prompts_for_videos(&video_ids).await
    }
}

#[async_trait]
impl ProfileBuilder for ProfileService {
    async fn build_initial_profile(&self, user_id: Uuid) -> PortResult<()> {
        self.generate_for_user(user_id, PROFILE_PROMPT_COUNT)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PromptGeneration, SavedVideo};
    use crate::llm::{LlmConfig, LlmError, LlmRequest, LlmResult, RetryPolicy};
    use crate::ports::{LanguageModelService, PortError};
    use assert_matches::assert_matches;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeSaved {
        likes: Vec<SavedVideo>,
        bookmarks: Vec<SavedVideo>,
    }

    #[async_trait]
    impl SavedVideoStore for FakeSaved {
        async fn list_saved(&self, _user_id: Uuid, kind: SavedKind) -> PortResult<Vec<SavedVideo>> {
            Ok(match kind {
                SavedKind::Liked => self.likes.clone(),
                SavedKind::Bookmarked => self.bookmarks.clone(),
            })
        }

        async fn add_saved(&self, _: Uuid, _: SavedKind, _: &SavedVideo) -> PortResult<()> {
            Ok(())
        }

        async fn remove_saved(&self, _: Uuid, _: SavedKind, _: &str) -> PortResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakePrompts {
        by_video: HashMap<String, String>,
        saved: Mutex<Vec<(GenerationMode, Vec<PromptGeneration>)>>,
    }

    #[async_trait]
    impl PromptStore for FakePrompts {
        async fn prompts_for_videos(&self, video_ids: &[String]) -> PortResult<Vec<String>> {
            Ok(video_ids
                .iter()
                .filter_map(|id| self.by_video.get(id).cloned())
                .collect())
        }

        async fn save_generated(
            &self,
            user_id: Uuid,
            mode: GenerationMode,
            generations: &[PromptGeneration],
        ) -> PortResult<Vec<GeneratedPrompt>> {
            self.saved.lock().unwrap().push((mode, generations.to_vec()));
            Ok(generations
                .iter()
                .map(|g| GeneratedPrompt {
                    id: Uuid::new_v4(),
                    user_id,
                    mode,
                    generation: g.clone(),
                    created_at: Utc::now(),
                })
                .collect())
        }

        async fn get_generated(&self, _: Uuid, _: &[Uuid]) -> PortResult<Vec<GeneratedPrompt>> {
            Ok(Vec::new())
        }

        async fn list_generated(&self, _: Uuid, _: u32) -> PortResult<Vec<GeneratedPrompt>> {
            Ok(Vec::new())
        }
    }

    struct EchoLlm {
        reply: LlmResult<String>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    #[async_trait]
    impl LanguageModelService for EchoLlm {
        async fn complete(&self, _config: &LlmConfig, request: &LlmRequest) -> LlmResult<String> {
            self.requests.lock().unwrap().push(request.clone());
            self.reply.clone()
        }
    }

    fn generator(llm: Arc<EchoLlm>) -> Arc<PromptGenerator> {
        let config = LlmConfig {
            model: "test".into(),
            endpoint: "http://localhost".into(),
            api_key: Some("key".into()),
            max_tokens: 128,
            temperature: 0.7,
        };
        Arc::new(PromptGenerator::new(llm, config).with_retry_policy(RetryPolicy::none()))
    }

    fn llm(reply: LlmResult<String>) -> Arc<EchoLlm> {
        Arc::new(EchoLlm {
            reply,
            requests: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn profile_uses_prompts_behind_saved_videos() {
        let saved = Arc::new(FakeSaved {
            likes: vec![SavedVideo::new("v1", Utc::now())],
            bookmarks: vec![
                SavedVideo::new("v1", Utc::now()),
                SavedVideo::new("v2", Utc::now()),
            ],
        });
        let prompts = Arc::new(FakePrompts {
            by_video: HashMap::from([
                ("v1".to_string(), "a glass whale in the sky".to_string()),
                ("v2".to_string(), "a clockwork garden".to_string()),
            ]),
            ..Default::default()
        });
        let llm = llm(Ok(r#"[{"prompt": "a glass jellyfish drifting over a city"}]"#.into()));
        let service = ProfileService::new(saved, prompts.clone(), generator(llm.clone()));

        let stored = service.generate_for_user(Uuid::new_v4(), 3).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].mode, GenerationMode::Profile);

        let request = llm.requests.lock().unwrap()[0].clone();
        assert!(request.prompt.contains("a glass whale in the sky"));
        assert!(request.prompt.contains("a clockwork garden"));
        assert_eq!(request.prompt.matches("a glass whale in the sky").count(), 1);
        assert!(request.prompt.contains("write 3 new prompts"));
    }

    #[tokio::test]
    async fn user_without_history_gets_random_prompts() {
        let saved = Arc::new(FakeSaved {
            likes: Vec::new(),
            bookmarks: Vec::new(),
        });
        let prompts = Arc::new(FakePrompts::default());
        let llm = llm(Ok(r#"[{"prompt": "a snail racing a comet"}]"#.into()));
        let service = ProfileService::new(saved, prompts.clone(), generator(llm.clone()));

        service.build_initial_profile(Uuid::new_v4()).await.unwrap();
        let saved = prompts.saved.lock().unwrap();
        assert_eq!(saved[0].0, GenerationMode::Random);
        let request = llm.requests.lock().unwrap()[0].clone();
        assert!(request.prompt.contains(&format!("Write {} prompts", PROFILE_PROMPT_COUNT)));
    }

    #[tokio::test]
    async fn llm_failure_surfaces_as_port_error() {
        let saved = Arc::new(FakeSaved {
            likes: Vec::new(),
            bookmarks: Vec::new(),
        });
        let prompts = Arc::new(FakePrompts::default());
        let service = ProfileService::new(saved, prompts.clone(), generator(llm(Err(LlmError::InvalidCredential))));

        let result = service.build_initial_profile(Uuid::new_v4()).await;
        assert_matches!(result, Err(PortError::Llm(LlmError::InvalidCredential)));
        assert!(prompts.saved.lock().unwrap().is_empty());
    }
}
