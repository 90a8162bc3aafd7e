use crate::markup;
use crate::model::ImportedComment;
use serde::Deserialize;
use serde_json::Value;

/// Every response is wrapped in `{"succeeded": bool, "message": ...}`.
#[derive(Deserialize, Debug)]
pub struct Envelope {
    pub succeeded: bool,
    #[serde(default)]
    pub message: Value,
}

#[derive(Deserialize, Debug)]
pub struct Forum {
    pub id: Value,
    pub shortname: String,
}

#[derive(Deserialize, Debug)]
pub struct ThreadEnvelope {
    pub thread: Identified,
}

/// Any object carrying an `id`, which the service sends as number or string.
#[derive(Deserialize, Debug)]
pub struct Identified {
    pub id: Value,
}

impl Identified {
    pub fn id_string(&self) -> Option<String> {
        id_string(&self.id)
    }
}

pub fn id_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fields of a post to create on the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRemotePost {
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub author_url: Option<String>,
    /// Minute precision, `%Y-%m-%dT%H:%M`.
    pub created_at: String,
}

impl From<&ImportedComment> for NewRemotePost {
    fn from(comment: &ImportedComment) -> Self {
        Self {
            message: markup::strip_tags(&comment.body),
            author_name: comment.author_name.clone(),
            author_email: comment.author_email.clone(),
            author_url: comment.author_url.clone().filter(|u| !u.is_empty()),
            created_at: comment.created_at.format("%Y-%m-%dT%H:%M").to_string(),
        }
    }
}
