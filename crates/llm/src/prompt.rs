use crate::provider::CompletionRequest;
use codechat_protocol::{ChatMessage, QueryRequest};
use codechat_search::ContextBundle;
use std::fmt::Write as _;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are CodeChat, a helpful assistant for working with code.";

/// Lays out system prompt, retrieved context, history and the new message
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl PromptBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn messages(
        &self,
        history: &[ChatMessage],
        context: &ContextBundle,
        message: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 3);
        if !self.system_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }
        if let Some(rendered) = render_context(context) {
            messages.push(ChatMessage::system(rendered));
        }
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(message));
        messages
    }

    pub fn build(&self, query: &QueryRequest, context: &ContextBundle) -> CompletionRequest {
        CompletionRequest::new(
            query.model.clone(),
            self.messages(&query.history, context, &query.message),
        )
    }
}

/// Snippets under `path:start-end` headers, or `None` for an empty bundle
pub fn render_context(context: &ContextBundle) -> Option<String> {
    if context.is_empty() {
        return None;
    }
    let mut out = String::from("Relevant code from the workspace:\n");
    for snippet in &context.snippets {
        let _ = write!(
            out,
            "\n### {}:{}-{}\n{}\n",
            snippet.path, snippet.start_line, snippet.end_line, snippet.text
        );
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codechat_protocol::{ProviderKind, Role};
    use codechat_search::{ContextSnippet, SnippetOrigin};
    use pretty_assertions::assert_eq;

    fn bundle() -> ContextBundle {
        ContextBundle {
            snippets: vec![ContextSnippet {
                id: "abc".into(),
                path: "src/a.py".into(),
                start_line: 3,
                end_line: 4,
                text: "def f():\n    g()".into(),
                score: 0.9,
                tokens: 4,
                origin: SnippetOrigin::Semantic,
            }],
            total_tokens: 4,
            budget: 100,
            dropped: 0,
        }
    }

    #[test]
    fn prompt_order_is_system_context_history_message() {
        let query = QueryRequest {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o".into(),
            history: vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")],
            message: "what does f do?".into(),
            files: vec![],
            stream: false,
        };
        let request = PromptBuilder::default().build(&query, &bundle());

        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(request.messages[0].content, DEFAULT_SYSTEM_PROMPT);
        assert!(request.messages[1].content.contains("### src/a.py:3-4\ndef f():"));
        assert_eq!(request.messages[4].content, "what does f do?");
        assert_eq!(request.model, "gpt-4o");
    }

    #[test]
    fn empty_context_adds_no_message() {
        let messages = PromptBuilder::new("").messages(&[], &ContextBundle::default(), "hi");
        assert_eq!(messages, vec![ChatMessage::user("hi")]);
    }
}
