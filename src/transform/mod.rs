//! Transformation domain: kinds, statuses, parameter validation, preset merge.

pub mod prompt;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformationKind {
    BlogPost,
    SocialMedia,
    EmailSequence,
    Newsletter,
    Summary,
    Custom,
}

impl TransformationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationKind::BlogPost => "blog_post",
            TransformationKind::SocialMedia => "social_media",
            TransformationKind::EmailSequence => "email_sequence",
            TransformationKind::Newsletter => "newsletter",
            TransformationKind::Summary => "summary",
            TransformationKind::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "blog_post" => Some(TransformationKind::BlogPost),
            "social_media" => Some(TransformationKind::SocialMedia),
            "email_sequence" => Some(TransformationKind::EmailSequence),
            "newsletter" => Some(TransformationKind::Newsletter),
            "summary" => Some(TransformationKind::Summary),
            "custom" => Some(TransformationKind::Custom),
            _ => None,
        }
    }

    pub fn all() -> &'static [TransformationKind] {
        &[
            TransformationKind::BlogPost,
            TransformationKind::SocialMedia,
            TransformationKind::EmailSequence,
            TransformationKind::Newsletter,
            TransformationKind::Summary,
            TransformationKind::Custom,
        ]
    }
}

impl std::fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TransformationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationStatus::Pending => "pending",
            TransformationStatus::Running => "running",
            TransformationStatus::Completed => "completed",
            TransformationStatus::Failed => "failed",
            TransformationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TransformationStatus::Pending),
            "running" => Some(TransformationStatus::Running),
            "completed" => Some(TransformationStatus::Completed),
            "failed" => Some(TransformationStatus::Failed),
            "cancelled" => Some(TransformationStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransformationStatus::Completed
                | TransformationStatus::Failed
                | TransformationStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TransformationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Pending,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }
}

/// Terminal failure reasons surfaced to clients. Provider-internal
/// diagnostics never appear here.
pub const REASON_PROVIDER_EXHAUSTED: &str = "provider_exhausted";
pub const REASON_CANCELLED: &str = "cancelled";
pub const REASON_INVALID_INPUT: &str = "invalid_input";

const TONES: &[&str] = &[
    "professional",
    "casual",
    "academic",
    "friendly",
    "persuasive",
];
const PLATFORMS: &[&str] = &["twitter", "instagram", "linkedin", "facebook"];

/// Validates a parameter map against its kind's schema. Unknown keys are
/// rejected so typos never silently change provider behavior.
pub fn validate_parameters(kind: TransformationKind, params: &Value) -> Result<(), String> {
    let map = params
        .as_object()
        .ok_or_else(|| "parameters must be an object".to_string())?;

    let allowed: &[&str] = match kind {
        TransformationKind::BlogPost => &["word_count", "tone"],
        TransformationKind::SocialMedia => &["platform", "post_count"],
        TransformationKind::EmailSequence => &["email_count"],
        TransformationKind::Newsletter => &["sections"],
        TransformationKind::Summary => &["length"],
        TransformationKind::Custom => &["custom_instructions"],
    };

    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(format!("unknown parameter '{}' for kind {}", key, kind));
        }
    }

    match kind {
        TransformationKind::BlogPost => {
            require_int_in_range(map, "word_count", 300, 3000)?;
            require_enum(map, "tone", TONES)?;
        }
        TransformationKind::SocialMedia => {
            require_enum(map, "platform", PLATFORMS)?;
            require_int_in_range(map, "post_count", 1, 10)?;
        }
        TransformationKind::EmailSequence => {
            require_int_in_range(map, "email_count", 1, 7)?;
        }
        TransformationKind::Newsletter => {
            let sections = map
                .get("sections")
                .ok_or_else(|| "missing parameter 'sections'".to_string())?;
            let list = sections
                .as_array()
                .ok_or_else(|| "'sections' must be a list of strings".to_string())?;
            if list.iter().any(|s| !s.is_string()) {
                return Err("'sections' must be a list of strings".to_string());
            }
        }
        TransformationKind::Summary => {
            require_int_in_range(map, "length", 100, 1000)?;
        }
        TransformationKind::Custom => {
            let instructions = map
                .get("custom_instructions")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "missing parameter 'custom_instructions'".to_string())?;
            if instructions.len() > 4000 {
                return Err("'custom_instructions' must be at most 4000 characters".to_string());
            }
        }
    }

    Ok(())
}

fn require_int_in_range(
    map: &serde_json::Map<String, Value>,
    key: &str,
    min: i64,
    max: i64,
) -> Result<(), String> {
    let value = map
        .get(key)
        .ok_or_else(|| format!("missing parameter '{}'", key))?
        .as_i64()
        .ok_or_else(|| format!("'{}' must be an integer", key))?;

    if value < min || value > max {
        return Err(format!("'{}' must be between {} and {}", key, min, max));
    }
    Ok(())
}

fn require_enum(
    map: &serde_json::Map<String, Value>,
    key: &str,
    allowed: &[&str],
) -> Result<(), String> {
    let value = map
        .get(key)
        .ok_or_else(|| format!("missing parameter '{}'", key))?
        .as_str()
        .ok_or_else(|| format!("'{}' must be a string", key))?;

    if !allowed.contains(&value) {
        return Err(format!(
            "'{}' must be one of: {}",
            key,
            allowed.join(", ")
        ));
    }
    Ok(())
}

/// Shallow merge of preset parameters with request overrides. Override keys
/// win; nested values are replaced wholesale, never deep-merged.
pub fn merge_parameters(preset: &Value, overrides: &Value) -> Value {
    let mut merged = preset.as_object().cloned().unwrap_or_default();

    if let Some(override_map) = overrides.as_object() {
        for (key, value) in override_map {
            merged.insert(key.clone(), value.clone());
        }
    }

    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_round_trip() {
        for kind in TransformationKind::all() {
            assert_eq!(TransformationKind::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(TransformationKind::parse("podcast"), None);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!TransformationStatus::Pending.is_terminal());
        assert!(!TransformationStatus::Running.is_terminal());
        assert!(TransformationStatus::Completed.is_terminal());
        assert!(TransformationStatus::Failed.is_terminal());
        assert!(TransformationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_blog_post_parameters() {
        let ok = json!({"word_count": 800, "tone": "professional"});
        assert!(validate_parameters(TransformationKind::BlogPost, &ok).is_ok());

        let out_of_range = json!({"word_count": 5000, "tone": "professional"});
        assert!(validate_parameters(TransformationKind::BlogPost, &out_of_range).is_err());

        let bad_tone = json!({"word_count": 800, "tone": "sarcastic"});
        assert!(validate_parameters(TransformationKind::BlogPost, &bad_tone).is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let params = json!({"length": 200, "style": "brief"});
        let err = validate_parameters(TransformationKind::Summary, &params).unwrap_err();
        assert!(err.contains("style"));
    }

    #[test]
    fn test_summary_range() {
        assert!(validate_parameters(TransformationKind::Summary, &json!({"length": 100})).is_ok());
        assert!(validate_parameters(TransformationKind::Summary, &json!({"length": 1000})).is_ok());
        assert!(validate_parameters(TransformationKind::Summary, &json!({"length": 99})).is_err());
        assert!(
            validate_parameters(TransformationKind::Summary, &json!({"length": 1001})).is_err()
        );
    }

    #[test]
    fn test_newsletter_sections() {
        let ok = json!({"sections": ["intro", "news"]});
        assert!(validate_parameters(TransformationKind::Newsletter, &ok).is_ok());

        let bad = json!({"sections": ["intro", 7]});
        assert!(validate_parameters(TransformationKind::Newsletter, &bad).is_err());
    }

    #[test]
    fn test_custom_instructions_length_cap() {
        let ok = json!({"custom_instructions": "rewrite as a haiku"});
        assert!(validate_parameters(TransformationKind::Custom, &ok).is_ok());

        let long = json!({"custom_instructions": "x".repeat(4001)});
        assert!(validate_parameters(TransformationKind::Custom, &long).is_err());
    }

    #[test]
    fn test_merge_overrides_win() {
        let preset = json!({"tone": "professional", "word_count": 800});
        let overrides = json!({"word_count": 500});

        let merged = merge_parameters(&preset, &overrides);
        assert_eq!(merged, json!({"tone": "professional", "word_count": 500}));
    }

    #[test]
    fn test_merge_with_empty_overrides_is_identity() {
        let preset = json!({"tone": "casual", "word_count": 600});
        let merged = merge_parameters(&preset, &json!({}));
        assert_eq!(merged, preset);
    }

    #[test]
    fn test_merge_replaces_nested_values_wholesale() {
        let preset = json!({"sections": ["a", "b"], "length": 100});
        let overrides = json!({"sections": ["c"]});

        let merged = merge_parameters(&preset, &overrides);
        assert_eq!(merged["sections"], json!(["c"]));
        assert_eq!(merged["length"], json!(100));
    }
}
