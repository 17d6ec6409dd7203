use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

string_enum! {
    pub enum Audience {
        Patients => "patients",
        Counselors => "counselors",
        All => "all",
    }
}

string_enum! {
    pub enum ReactionType {
        Like => "like",
        Support => "support",
        Insight => "insight",
        Celebrate => "celebrate",
    }
}

string_enum! {
    pub enum AttachmentType {
        Image => "image",
        Document => "document",
        Link => "link",
        Video => "video",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(rename = "type", default = "default_attachment_type")]
    pub attachment_type: AttachmentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_attachment_type() -> AttachmentType {
    AttachmentType::Link
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub like: i32,
    pub support: i32,
    pub insight: i32,
    pub celebrate: i32,
}

impl ReactionSummary {
    pub fn count_mut(&mut self, reaction: ReactionType) -> &mut i32 {
        match reaction {
            ReactionType::Like => &mut self.like,
            ReactionType::Support => &mut self.support,
            ReactionType::Insight => &mut self.insight,
            ReactionType::Celebrate => &mut self.celebrate,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CommunityPost {
    pub id: i32,
    pub author_id: i32,
    pub title: Option<String>,
    pub content: String,
    pub audience: Audience,
    pub tags: Vec<String>,
    pub attachments: Json<Vec<Attachment>>,
    pub is_pinned: bool,
    pub published_at: DateTime<Utc>,
    pub reactions_like: i32,
    pub reactions_support: i32,
    pub reactions_insight: i32,
    pub reactions_celebrate: i32,
    pub comment_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommunityPost {
    pub fn reaction_summary(&self) -> ReactionSummary {
        ReactionSummary {
            like: self.reactions_like,
            support: self.reactions_support,
            insight: self.reactions_insight,
            celebrate: self.reactions_celebrate,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CommunityComment {
    pub id: i32,
    pub post_id: i32,
    pub author_id: i32,
    pub content: String,
    pub parent_comment_id: Option<i32>,
    pub mentions: Vec<i32>,
    pub reactions_like: i32,
    pub reactions_support: i32,
    pub reactions_insight: i32,
    pub reactions_celebrate: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommunityComment {
    pub fn reaction_summary(&self) -> ReactionSummary {
        ReactionSummary {
            like: self.reactions_like,
            support: self.reactions_support,
            insight: self.reactions_insight,
            celebrate: self.reactions_celebrate,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub audience: Option<Audience>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub content: Option<String>,
    pub parent_comment: Option<i32>,
    #[serde(default)]
    pub mentions: Vec<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    #[serde(rename = "type")]
    pub reaction_type: Option<String>,
}
