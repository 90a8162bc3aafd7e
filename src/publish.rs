use crate::db::{self, Pool};
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, instrument};

pub const HTML_MIME: &str = "text/html; charset=utf-8";
pub const ATOM_MIME: &str = "application/atom+xml";
pub const XML_MIME: &str = "application/xml";

/// Key/value store for generated artifacts. Publishing overwrites by path.
#[async_trait]
pub trait StaticPublisher: Send + Sync {
    /// `indexed` marks the path for sitemap enumeration.
    async fn publish(
        &self,
        path: &str,
        content: &[u8],
        content_type: &str,
        indexed: bool,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqlitePublisher {
    pool: Pool,
}

impl SqlitePublisher {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StaticPublisher for SqlitePublisher {
    #[instrument(skip(self, content))]
    async fn publish(
        &self,
        path: &str,
        content: &[u8],
        content_type: &str,
        indexed: bool,
    ) -> Result<()> {
        db::put_static(&self.pool, path, content, content_type, indexed).await?;
        debug!(bytes = content.len(), "published");
        Ok(())
    }
}
