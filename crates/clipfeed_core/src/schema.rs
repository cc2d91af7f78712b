//! crates/clipfeed_core/src/schema.rs
//!
//! Static JSON Schemas handed to the language model as its response format.
//! Selecting a schema is a pure lookup; checking a reply against it is the
//! prompt generator's job.

use serde::{Deserialize, Serialize};

/// Why a batch of prompts is being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Profile,
    Random,
    Mutation,
    Crossover,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Profile => "profile",
            GenerationMode::Random => "random",
            GenerationMode::Mutation => "mutation",
            GenerationMode::Crossover => "crossover",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "profile" => Some(GenerationMode::Profile),
            "random" => Some(GenerationMode::Random),
            "mutation" => Some(GenerationMode::Mutation),
            "crossover" => Some(GenerationMode::Crossover),
            _ => None,
        }
    }
}

/// Shared by profile-based and random exploration requests. The two modes
/// produce the same shape; they differ only in the instructions sent with it.
pub const PROMPT_LIST_SCHEMA: &str = r#"{
  "type": "array",
  "items": {
    "type": "object",
    "properties": {
      "prompt": { "type": "string" }
    },
    "required": ["prompt"],
    "additionalProperties": false
  }
}"#;

/// Mutation and crossover replies. Only the array for the requested mode is
/// expected to be present.
pub const EVOLUTION_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "mutatedPrompts": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": {
          "prompt": { "type": "string" },
          "parentId": { "type": "string" }
        },
        "required": ["prompt", "parentId"],
        "additionalProperties": false
      }
    },
    "crossoverPrompts": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": {
          "prompt": { "type": "string" },
          "parentIds": {
            "type": "array",
            "items": { "type": "string" }
          }
        },
        "required": ["prompt", "parentIds"],
        "additionalProperties": false
      }
    }
  },
  "additionalProperties": false
}"#;

pub fn schema_for(mode: GenerationMode) -> &'static str {
    match mode {
        GenerationMode::Profile | GenerationMode::Random => PROMPT_LIST_SCHEMA,
        GenerationMode::Mutation | GenerationMode::Crossover => EVOLUTION_SCHEMA,
    }
}

/// Name attached to the schema in the response-format envelope.
pub fn schema_name(mode: GenerationMode) -> &'static str {
    match mode {
        GenerationMode::Profile | GenerationMode::Random => "prompt_list",
        GenerationMode::Mutation | GenerationMode::Crossover => "prompt_evolution",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_and_random_share_one_schema() {
        assert_eq!(
            schema_for(GenerationMode::Profile),
            schema_for(GenerationMode::Random)
        );
        assert_eq!(
            schema_name(GenerationMode::Profile),
            schema_name(GenerationMode::Random)
        );
    }

    #[test]
    fn every_schema_is_valid_json() {
        for mode in [
            GenerationMode::Profile,
            GenerationMode::Random,
            GenerationMode::Mutation,
            GenerationMode::Crossover,
        ] {
            let parsed: serde_json::Value =
                serde_json::from_str(schema_for(mode)).expect("schema should parse");
            assert!(parsed.get("type").is_some(), "{:?} schema has no type", mode);
        }
    }

    #[test]
    fn evolution_schema_declares_both_arrays() {
        let parsed: serde_json::Value = serde_json::from_str(EVOLUTION_SCHEMA).unwrap();
        assert!(parsed["properties"]["mutatedPrompts"].is_object());
        assert!(parsed["properties"]["crossoverPrompts"].is_object());
    }

    #[test]
    fn mode_names_round_trip() {
        for mode in [
            GenerationMode::Profile,
            GenerationMode::Random,
            GenerationMode::Mutation,
            GenerationMode::Crossover,
        ] {
            assert_eq!(GenerationMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(GenerationMode::parse("remix"), None);
    }
}
