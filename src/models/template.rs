use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

string_enum! {
    pub enum TemplateCategory {
        Initial => "initial",
        FollowUp => "follow-up",
        Crisis => "crisis",
        Termination => "termination",
        General => "general",
    }
}

string_enum! {
    pub enum FieldType {
        Text => "text",
        Textarea => "textarea",
        Number => "number",
        Date => "date",
        Select => "select",
        Checkbox => "checkbox",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

fn default_field_type() -> FieldType {
    FieldType::Text
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotesTemplate {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub template: String,
    pub fields: Json<Vec<TemplateField>>,
    pub created_by: i32,
    pub is_default: bool,
    pub is_public: bool,
    pub category: TemplateCategory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub template: Option<String>,
    pub fields: Option<Vec<TemplateField>>,
    pub is_default: Option<bool>,
    pub is_public: Option<bool>,
    pub category: Option<TemplateCategory>,
}

/// Select fields need at least one option; names must be present and unique.
pub fn validate_fields(fields: &[TemplateField]) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for field in fields {
        let name = field.name.trim();
        if name.is_empty() {
            return Err("Template field names cannot be empty".to_string());
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(format!("Duplicate template field: {}", name));
        }
        if field.field_type == FieldType::Select && field.options.is_empty() {
            return Err(format!("Select field '{}' needs at least one option", name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, field_type: FieldType, options: &[&str]) -> TemplateField {
        TemplateField {
            name: name.to_string(),
            field_type,
            required: false,
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    #[test]
    fn test_validate_fields() {
        assert!(validate_fields(&[]).is_ok());
        assert!(validate_fields(&[
            field("Mood", FieldType::Select, &["low", "ok", "good"]),
            field("Summary", FieldType::Textarea, &[]),
        ])
        .is_ok());
        assert!(validate_fields(&[field("Mood", FieldType::Select, &[])]).is_err());
        assert!(validate_fields(&[field(" ", FieldType::Text, &[])]).is_err());
        assert!(validate_fields(&[
            field("Goal", FieldType::Text, &[]),
            field("goal", FieldType::Text, &[]),
        ])
        .is_err());
    }

    #[test]
    fn test_field_type_defaults_to_text() {
        let parsed: TemplateField = serde_json::from_str(r#"{"name":"Plan"}"#).unwrap();
        assert_eq!(parsed.field_type, FieldType::Text);
        assert!(!parsed.required);
    }
}
