// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Supplies the base system prompt and the tool synthesis prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptProvider {
    system_prompt_template: Option<String>,
}

impl PromptProvider {
    pub fn new(system_prompt_template: Option<String>) -> Self {
        Self {
            system_prompt_template,
        }
    }

    /// The base system prompt with `{user_email}` substituted.
    pub fn get_system_prompt(&self, user_email: Option<&str>) -> Option<String> {
        self.system_prompt_template
            .as_ref()
            .map(|template| template.replace("{user_email}", user_email.unwrap_or("anonymous")))
    }

    /// Synthesis instruction appended after tool results, parameterized on
    /// the user's latest question.
    pub fn get_tool_synthesis_prompt(&self, user_question: &str) -> String {
        format!(
            "The requested tools have finished running and their results appear above. \
             Using those results, write the final answer to: {user_question}. \
             Answer directly from the tool output; do not describe the tools themselves."
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_substitutes_user_email() {
        let provider = PromptProvider::new(Some("You assist {user_email}.".into()));
        assert_eq!(
            provider.get_system_prompt(Some("u@e.com")).unwrap(),
            "You assist u@e.com."
        );
    }

    #[test]
    fn missing_user_becomes_anonymous() {
        let provider = PromptProvider::new(Some("You assist {user_email}.".into()));
        assert_eq!(
            provider.get_system_prompt(None).unwrap(),
            "You assist anonymous."
        );
    }

    #[test]
    fn no_template_yields_no_prompt() {
        assert!(PromptProvider::default().get_system_prompt(Some("u@e.com")).is_none());
    }

    #[test]
    fn synthesis_prompt_embeds_the_question() {
        let provider = PromptProvider::default();
        let prompt = provider.get_tool_synthesis_prompt("how many rows are in data.csv?");
        assert!(prompt.contains("how many rows are in data.csv?"));
    }
}
