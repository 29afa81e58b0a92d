//! Prompt rendering for transformation jobs.

use serde_json::Value;

use super::TransformationKind;

pub const SYSTEM_PROMPT: &str = "You are an expert content repurposing assistant. \
Your task is to transform the provided content into the requested format while \
maintaining the key information and adapting the style appropriately.";

/// Renders the user prompt from the kind, effective parameters, and the
/// extracted document content (when the job references a document).
pub fn build_prompt(
    kind: TransformationKind,
    params: &Value,
    document_content: Option<&str>,
) -> String {
    let mut prompt = match document_content {
        Some(content) => format!("Here is the original content:\n\n{}\n\n", content),
        None => String::new(),
    };

    match kind {
        TransformationKind::BlogPost => {
            prompt.push_str("Transform this content into a well-structured blog post. ");
            if let Some(word_count) = params.get("word_count").and_then(Value::as_i64) {
                prompt.push_str(&format!(
                    "The target word count is around {} words. ",
                    word_count
                ));
            }
            if let Some(tone) = params.get("tone").and_then(Value::as_str) {
                prompt.push_str(&format!("Use a {} tone. ", tone));
            }
            prompt.push_str(
                "Include a catchy title, introduction, main sections with subheadings, \
                 and a conclusion.",
            );
        }
        TransformationKind::SocialMedia => {
            let platform = params
                .get("platform")
                .and_then(Value::as_str)
                .unwrap_or("general");
            prompt.push_str(&format!(
                "Create social media content for {} based on this information. ",
                platform
            ));
            if let Some(count) = params.get("post_count").and_then(Value::as_i64) {
                prompt.push_str(&format!("Generate {} distinct posts. ", count));
            }
            prompt.push_str(
                "Each post should be engaging, concise, and include relevant hashtags.",
            );
        }
        TransformationKind::EmailSequence => {
            prompt.push_str("Transform this content into an email sequence. ");
            if let Some(count) = params.get("email_count").and_then(Value::as_i64) {
                prompt.push_str(&format!("Create a series of {} emails. ", count));
            }
            prompt.push_str(
                "Include subject lines and email body content. Each email should have a \
                 clear purpose, engaging opening, valuable content, and a strong \
                 call-to-action.",
            );
        }
        TransformationKind::Newsletter => {
            prompt.push_str("Convert this content into a newsletter format. ");
            if let Some(sections) = params.get("sections").and_then(Value::as_array) {
                let names: Vec<&str> = sections.iter().filter_map(Value::as_str).collect();
                if !names.is_empty() {
                    prompt.push_str(&format!(
                        "Include the following sections: {}. ",
                        names.join(", ")
                    ));
                }
            }
            prompt.push_str(
                "The newsletter should have a clear structure, engaging introduction, \
                 main content sections, and a conclusion with next steps or \
                 call-to-action.",
            );
        }
        TransformationKind::Summary => {
            prompt.push_str("Create a concise summary of this content. ");
            if let Some(length) = params.get("length").and_then(Value::as_i64) {
                prompt.push_str(&format!(
                    "The summary should be approximately {} words. ",
                    length
                ));
            }
            prompt.push_str(
                "Capture the key points, main arguments, and essential information \
                 while maintaining clarity.",
            );
        }
        TransformationKind::Custom => {
            let instructions = params
                .get("custom_instructions")
                .and_then(Value::as_str)
                .unwrap_or(
                    "Transform this content into a new format while preserving the key \
                     information.",
                );
            prompt.push_str(instructions);
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blog_post_prompt_includes_parameters() {
        let params = json!({"word_count": 500, "tone": "casual"});
        let prompt = build_prompt(TransformationKind::BlogPost, &params, Some("source text"));

        assert!(prompt.contains("source text"));
        assert!(prompt.contains("500 words"));
        assert!(prompt.contains("casual tone"));
    }

    #[test]
    fn test_summary_prompt_without_document() {
        let params = json!({"length": 200});
        let prompt = build_prompt(TransformationKind::Summary, &params, None);

        assert!(!prompt.contains("original content"));
        assert!(prompt.contains("200 words"));
    }

    #[test]
    fn test_custom_prompt_uses_instructions() {
        let params = json!({"custom_instructions": "Rewrite as a pirate shanty."});
        let prompt = build_prompt(TransformationKind::Custom, &params, Some("doc"));

        assert!(prompt.contains("pirate shanty"));
    }

    #[test]
    fn test_newsletter_prompt_lists_sections() {
        let params = json!({"sections": ["intro", "product news"]});
        let prompt = build_prompt(TransformationKind::Newsletter, &params, None);

        assert!(prompt.contains("intro, product news"));
    }
}
