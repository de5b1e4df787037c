//! Final synthesis of the accumulated findings.

use crate::error::LlmError;
use crate::llm::{string_fields_schema, structured, ChatMessage, LanguageModel};
use crate::models::FinalAnswer;
use crate::prompts::Prompts;
use std::sync::Arc;
use tracing::info;

pub struct Reviewer {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<Prompts>,
}

impl Reviewer {
    pub fn new(model: Arc<dyn LanguageModel>, prompts: Arc<Prompts>) -> Self {
        Self { model, prompts }
    }

    /// One structured model call; no retries, no tools.
    pub async fn review(
        &self,
        revenue: Option<&str>,
        expenditure: Option<&str>,
        query: &str,
    ) -> Result<FinalAnswer, LlmError> {
        info!("Reviewing findings");
        let messages = [ChatMessage::user(
            self.prompts.reviewer_request(revenue, expenditure, query),
        )];
        let schema = string_fields_schema(&["direct_answer"]);
        structured(self.model.as_ref(), &messages, &schema).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use serde_json::json;

    #[tokio::test]
    async fn test_review_embeds_findings_and_query() {
        let model = Arc::new(
            ScriptedModel::new().json_reply(json!({"direct_answer": "CIT rose 5% in 2024."})),
        );
        let reviewer = Reviewer::new(model.clone(), Arc::new(Prompts::default()));

        let answer = reviewer
            .review(Some("CIT +5%"), None, "What happened to corporate income tax?")
            .await
            .unwrap();
        assert_eq!(answer.direct_answer, "CIT rose 5% in 2024.");

        let log = model.json_log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let prompt = &log[0][0].content;
        assert!(prompt.contains("CIT +5%"));
        assert!(prompt.contains("<empty>"));
        assert!(prompt.contains("What happened to corporate income tax?"));
    }

    #[tokio::test]
    async fn test_review_failure_propagates() {
        let model = Arc::new(ScriptedModel::new().json_error(LlmError::Timeout(300)));
        let reviewer = Reviewer::new(model, Arc::new(Prompts::default()));
        let err = reviewer.review(None, None, "q").await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout(300)));
    }
}
