use serde_json::json;
use skillrelay_core::config::{AppConfig, LoadOptions};
use skillrelay_core::SkillRegistry;

use crate::commands::CommandResult;

/// Builds the registry exactly as the server would and reports how intents map to skills.
pub fn run(options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "skills",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let registry = match SkillRegistry::from_config(&config.skills) {
        Ok(registry) => registry,
        Err(error) => {
            return CommandResult::failure("skills", "skill_registry", error.to_string(), 6);
        }
    };

    let skills: Vec<_> = registry
        .skills()
        .map(|skill| {
            json!({
                "id": skill.id.to_string(),
                "app_id": skill.app_identity,
                "endpoint": skill.endpoint,
                "trigger_intents": skill.trigger_intents,
                "required_auth_connections": skill.required_auth_connections,
            })
        })
        .collect();

    // Recognized intents no skill claims are handled by the root.
    let root_intents: Vec<&str> = config
        .intents
        .keys()
        .filter(|intent| registry.resolve_skill_for_intent(intent).is_none())
        .map(String::as_str)
        .collect();

    // Trigger intents the keyword recognizer has no phrases for can never fire.
    let unreachable: Vec<String> = registry
        .skills()
        .flat_map(|skill| {
            skill
                .trigger_intents
                .iter()
                .filter(|intent| !config.intents.contains_key(intent.as_str()))
                .map(move |intent| format!("{}:{intent}", skill.id))
        })
        .collect();

    CommandResult::success_with(
        "skills",
        format!("{} skill(s) registered without ambiguity", registry.len()),
        json!({
            "skills": skills,
            "root_intents": root_intents,
            "unreachable_trigger_intents": unreachable,
        }),
    )
}
