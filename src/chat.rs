//! Question answering over an assembled context.
//!
//! `answer` validates the request, assembles the selected files, caps the
//! context at the configured character budget and sends one system + user
//! message pair to the model.

use crate::assemble::{validate_selection, ContextAssembler};
use crate::credential::Credential;
use crate::error::DriveError;
use crate::llm::{ChatMessage, ChatModel};
use crate::models::SelectedFile;

/// Caps `context` at `max_chars` characters.
///
/// Returns the possibly shortened text and whether anything was cut. The cut
/// lands on a char boundary and is followed by a note giving both sizes.
pub fn apply_budget(context: &str, max_chars: usize) -> (String, bool) {
    let total = context.chars().count();
    if total <= max_chars {
        return (context.to_string(), false);
    }
    let cut = context
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(context.len());
    let mut text = context[..cut].to_string();
    text.push_str(&format!(
        "\n\n[Context truncated: kept {} of {} characters]",
        max_chars, total
    ));
    (text, true)
}

fn user_message(context: &str, question: &str) -> String {
    format!("Documents:{}\n\nQuestion: {}", context, question)
}

pub struct QuestionAnswerer<'a> {
    assembler: ContextAssembler<'a>,
    model: &'a dyn ChatModel,
    system_prompt: &'a str,
    max_chars: usize,
}

impl<'a> QuestionAnswerer<'a> {
    pub fn new(
        assembler: ContextAssembler<'a>,
        model: &'a dyn ChatModel,
        system_prompt: &'a str,
        max_chars: usize,
    ) -> Self {
        Self {
            assembler,
            model,
            system_prompt,
            max_chars,
        }
    }

    pub async fn answer(
        &self,
        question: &str,
        files: &[SelectedFile],
        cred: &Credential,
    ) -> Result<String, DriveError> {
        if question.trim().is_empty() {
            return Err(DriveError::MalformedInput("Question must not be empty".to_string()));
        }
        validate_selection(files)?;

        let context = self.assembler.assemble(files, cred).await?;
        let (text, truncated) = apply_budget(&context.text, self.max_chars);
        if truncated {
            tracing::warn!(
                context_len = context.text.len(),
                max_chars = self.max_chars,
                "context exceeds budget, truncated"
            );
        }

        let messages = [
            ChatMessage::system(self.system_prompt),
            ChatMessage::user(user_message(&text, question)),
        ];
        tracing::debug!(
            model = self.model.model_name(),
            file_count = context.document_count,
            context_len = text.len(),
            "calling model"
        );
        self.model.complete(&messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::Endpoints;
    use crate::extract::Extractor;
    use crate::remote::{RemoteError, RemoteResourceClient};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[test]
    fn short_context_is_untouched() {
        let (text, cut) = apply_budget("hello", 5);
        assert_eq!(text, "hello");
        assert!(!cut);
    }

    #[test]
    fn long_context_is_cut_on_char_boundary() {
        let (text, cut) = apply_budget("héllo wörld", 4);
        assert!(cut);
        assert!(text.starts_with("héll\n\n[Context truncated: kept 4 of 11 characters]"));
    }

    struct StaticClient;

    #[async_trait]
    impl RemoteResourceClient for StaticClient {
        async fn get_json(
            &self,
            _url: &str,
            _cred: &Credential,
        ) -> Result<serde_json::Value, RemoteError> {
            Err(RemoteError::NotFound)
        }

        async fn get_bytes(&self, _url: &str, _cred: &Credential) -> Result<Vec<u8>, RemoteError> {
            Ok(b"0123456789".to_vec())
        }
    }

    #[derive(Default)]
    struct RecordingModel {
        seen: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, DriveError> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            Ok("the answer".to_string())
        }
    }

    fn cred() -> Credential {
        Credential::parse("tok").unwrap()
    }

    #[tokio::test]
    async fn sends_system_and_user_messages() {
        let client = StaticClient;
        let ep = Endpoints::new("https://g");
        let model = RecordingModel::default();
        let assembler = ContextAssembler::new(&client, &ep, Arc::new(Extractor::default()), 2);
        let qa = QuestionAnswerer::new(assembler, &model, "be terse", 1000);

        let files = vec![SelectedFile::new("i", "d", "digits.txt")];
        let answer = qa.answer("What digits?", &files, &cred()).await.unwrap();
        assert_eq!(answer, "the answer");

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ChatMessage::system("be terse"));
        assert_eq!(seen[1].role, "user");
        assert!(seen[1].content.contains("--- digits.txt ---\n0123456789"));
        assert!(seen[1].content.ends_with("Question: What digits?"));
    }

    #[tokio::test]
    async fn oversized_context_is_truncated_before_model_call() {
        let client = StaticClient;
        let ep = Endpoints::new("https://g");
        let model = RecordingModel::default();
        let assembler = ContextAssembler::new(&client, &ep, Arc::new(Extractor::default()), 2);
        let qa = QuestionAnswerer::new(assembler, &model, "sys", 10);

        let files = vec![SelectedFile::new("i", "d", "digits.txt")];
        qa.answer("q", &files, &cred()).await.unwrap();
        let seen = model.seen.lock().unwrap();
        assert!(seen[1].content.contains("[Context truncated"));
        assert!(!seen[1].content.contains("0123456789"));
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let client = StaticClient;
        let ep = Endpoints::new("https://g");
        let model = RecordingModel::default();
        let assembler = ContextAssembler::new(&client, &ep, Arc::new(Extractor::default()), 2);
        let qa = QuestionAnswerer::new(assembler, &model, "sys", 10);
        let files = vec![SelectedFile::new("i", "d", "a.txt")];
        let err = qa.answer("  ", &files, &cred()).await.unwrap_err();
        assert_eq!(err.kind(), "malformed_input");
        assert!(model.seen.lock().unwrap().is_empty());
    }
}
