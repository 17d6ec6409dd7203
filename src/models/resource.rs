use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::profile::StringOrList;

string_enum! {
    pub enum ResourceType {
        Pdf => "pdf",
        Video => "video",
        Guide => "guide",
        Link => "link",
        Audio => "audio",
        Image => "image",
    }
}

string_enum! {
    pub enum ResourceCategory {
        Counseling => "counseling",
        Education => "education",
        Support => "support",
        Medical => "medical",
        Wellness => "wellness",
        Other => "other",
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: i32,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub url: String,
    pub thumbnail: String,
    pub uploaded_by: i32,
    pub category: ResourceCategory,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub download_count: i32,
    pub view_count: i32,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: Option<ResourceType>,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    pub category: Option<ResourceCategory>,
    pub tags: Option<StringOrList>,
    pub is_public: Option<bool>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResourceRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: Option<ResourceType>,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    pub category: Option<ResourceCategory>,
    pub tags: Option<StringOrList>,
    pub is_public: Option<bool>,
}

/// Tags arrive either as a list or as one comma separated string.
pub fn normalize_tags(tags: Option<StringOrList>) -> Vec<String> {
    match tags {
        None => Vec::new(),
        Some(StringOrList::Many(list)) => list
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
        Some(StringOrList::One(joined)) => joined
            .split(',')
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tags() {
        assert!(normalize_tags(None).is_empty());
        assert_eq!(
            normalize_tags(Some(StringOrList::One("coping, nutrition ,,sleep".to_string()))),
            vec!["coping", "nutrition", "sleep"]
        );
        assert_eq!(
            normalize_tags(Some(StringOrList::Many(vec![" a ".to_string(), "".to_string()]))),
            vec!["a"]
        );
    }
}
