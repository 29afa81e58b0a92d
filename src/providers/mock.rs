//! Deterministic mock provider for development and tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::transform::TransformationKind;

use super::{Provider, ProviderError, ProviderReply, ProviderRequest};

const MODEL: &str = "mock-1";

pub struct MockProvider {
    latency: Duration,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(10),
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }

    fn render(prompt: &str) -> String {
        let lower = prompt.to_lowercase();

        if lower.contains("blog post") {
            "# Repurposed Blog Post\n\n## Introduction\n\nThis draft restructures the \
             source material into a titled article with sections and a closing summary.\n\n\
             ## Key Points\n\n- First takeaway from the source\n- Second takeaway\n\n\
             ## Conclusion\n\nA short wrap-up with a call to action."
                .to_string()
        } else if lower.contains("social media") {
            "Post 1: Key insight from the source. #content\n\nPost 2: A second angle on \
             the same material, phrased for engagement. #repurpose"
                .to_string()
        } else if lower.contains("email") {
            "Subject: A quick idea for you\n\nEmail 1 opens with the hook, delivers the \
             core value, and closes with a call to action."
                .to_string()
        } else if lower.contains("newsletter") {
            "## This Week\n\nOpening note, followed by the requested sections and a \
             closing call to action."
                .to_string()
        } else if lower.contains("summary") {
            "The source content covers its main topic, supports it with key arguments, \
             and closes on the essential takeaways."
                .to_string()
        } else {
            "Transformed content derived from the provided material.".to_string()
        }
    }

    fn estimate_tokens(text: &str) -> i64 {
        (text.split_whitespace().count() as f64 * 1.3) as i64
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn supports(&self, _kind: TransformationKind) -> bool {
        true
    }

    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        tokio::time::sleep(self.latency).await;

        let content = Self::render(&request.prompt);

        Ok(ProviderReply {
            tokens_in: Self::estimate_tokens(&request.prompt),
            tokens_out: Self::estimate_tokens(&content),
            content,
            model: MODEL.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> ProviderRequest {
        ProviderRequest {
            system: "system".to_string(),
            prompt: prompt.to_string(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn test_mock_detects_kind_from_prompt() {
        let provider = MockProvider::with_latency(Duration::ZERO);

        let reply = provider
            .invoke(&request("Transform this content into a well-structured blog post."))
            .await
            .unwrap();
        assert!(reply.content.contains("Blog Post"));

        let reply = provider
            .invoke(&request("Create a concise summary of this content."))
            .await
            .unwrap();
        assert!(reply.content.contains("takeaways"));
    }

    #[tokio::test]
    async fn test_mock_reports_token_usage() {
        let provider = MockProvider::with_latency(Duration::ZERO);
        let reply = provider.invoke(&request("summary please")).await.unwrap();

        assert!(reply.tokens_in > 0);
        assert!(reply.tokens_out > 0);
        assert_eq!(reply.model, MODEL);
    }
}
