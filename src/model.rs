use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Three-part build version recorded by deploy markers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionTriple {
    pub major: u32,
    pub minor: u32,
    pub rev: u32,
}

impl VersionTriple {
    pub const fn new(major: u32, minor: u32, rev: u32) -> Self {
        Self { major, minor, rev }
    }

    /// Version of the running build, taken from the crate manifest.
    pub fn current() -> Self {
        Self {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            rev: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        }
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.rev)
    }
}

/// Persisted record of the build that last ran deploy actions for a version id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployVersionMarker {
    pub key_name: String,
    pub version: VersionTriple,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: i64,
    pub path: Option<String>,
    pub title: String,
    pub body: String,
    pub body_markup: String,
    pub tags: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub last_regenerated_at: Option<DateTime<Utc>>,
}

impl Post {
    /// Drafts have neither a path nor a publish time and are never regenerated.
    pub fn is_draft(&self) -> bool {
        self.path.is_none() || self.published.is_none()
    }

    /// `YYYY-MM` bucket used by archive listings.
    pub fn archive_month(&self) -> Option<String> {
        self.published
            .map(|ts| format!("{:04}-{:02}", ts.year(), ts.month()))
    }
}

/// Fields written when creating or overwriting a post by path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPost {
    pub path: Option<String>,
    pub title: String,
    pub body: String,
    pub body_markup: String,
    pub tags: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub path: String,
    pub title: String,
    pub body: String,
    pub body_markup: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub last_regenerated_at: Option<DateTime<Utc>>,
}

/// Scan position for posts: newest-first by publish time, ties broken by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PostKey {
    pub published: DateTime<Utc>,
    pub id: i64,
}

/// Scan position for pages: newest-first by creation time, ties broken by path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey {
    pub created: DateTime<Utc>,
    pub path: String,
}

/// Artifact generators a source entity can depend on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    Post,
    Page,
    Index,
    Tag,
    Archive,
    Atom,
    Sitemap,
}

impl GeneratorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratorKind::Post => "post",
            GeneratorKind::Page => "page",
            GeneratorKind::Index => "index",
            GeneratorKind::Tag => "tag",
            GeneratorKind::Archive => "archive",
            GeneratorKind::Atom => "atom",
            GeneratorKind::Sitemap => "sitemap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "post" => Some(GeneratorKind::Post),
            "page" => Some(GeneratorKind::Page),
            "index" => Some(GeneratorKind::Index),
            "tag" => Some(GeneratorKind::Tag),
            "archive" => Some(GeneratorKind::Archive),
            "atom" => Some(GeneratorKind::Atom),
            "sitemap" => Some(GeneratorKind::Sitemap),
            _ => None,
        }
    }
}

/// A (generator, argument) pair. Equality is by value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegenerationKey {
    pub generator: GeneratorKind,
    pub argument: String,
}

impl RegenerationKey {
    pub fn new(generator: GeneratorKind, argument: impl Into<String>) -> Self {
        Self {
            generator,
            argument: argument.into(),
        }
    }
}

impl fmt::Display for RegenerationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generator.as_str(), self.argument)
    }
}

/// Top-level item read from an external export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportedArticle {
    pub path: Option<String>,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub comments: Vec<ImportedComment>,
}

/// Root comments carry this parent id.
pub const ROOT_PARENT: i64 = 0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportedComment {
    pub id: i64,
    pub parent: i64,
    pub author_name: String,
    pub author_email: String,
    pub author_url: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Thread id issued by the remote commenting service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RemoteThreadRef(pub String);

/// Post id issued by the remote commenting service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RemotePostRef(pub String);

impl fmt::Display for RemoteThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RemotePostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Done,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "done" => Some(TaskState::Done),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}
