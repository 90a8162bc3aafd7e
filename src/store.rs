//! Ordered sources over the SQLite tables, for use with [`crate::scan`].

use crate::db::{self, Pool, PostFilter};
use crate::model::{Page, PageKey, Post, PostKey};
use crate::scan::{Direction, Keyed, OrderedSource};
use anyhow::{anyhow, Result};
use async_trait::async_trait;

impl Keyed for Post {
    type Key = PostKey;

    /// Drafts never come out of a post source, so a missing publish time
    /// only happens for hand-built values; they sort first.
    fn sort_key(&self) -> PostKey {
        PostKey {
            published: self.published.unwrap_or_default(),
            id: self.id,
        }
    }
}

impl Keyed for Page {
    type Key = PageKey;

    fn sort_key(&self) -> PageKey {
        PageKey {
            created: self.created,
            path: self.path.clone(),
        }
    }
}

/// Published posts, optionally restricted by tag or publish window.
#[derive(Debug, Clone)]
pub struct PostSource<'a> {
    pool: &'a Pool,
    filter: PostFilter,
}

impl<'a> PostSource<'a> {
    pub fn new(pool: &'a Pool, filter: PostFilter) -> Self {
        Self { pool, filter }
    }

    pub fn all(pool: &'a Pool) -> Self {
        Self::new(pool, PostFilter::All)
    }

    pub fn pool(&self) -> &'a Pool {
        self.pool
    }
}

#[async_trait]
impl<'a> OrderedSource<Post> for PostSource<'a> {
    async fn fetch_after(
        &self,
        after: Option<&PostKey>,
        direction: Direction,
        limit: u32,
    ) -> Result<Vec<Post>> {
        db::fetch_posts_after(self.pool, &self.filter, after, direction, limit).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageSource<'a> {
    pool: &'a Pool,
}

impl<'a> PageSource<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &'a Pool {
        self.pool
    }
}

#[async_trait]
impl<'a> OrderedSource<Page> for PageSource<'a> {
    async fn fetch_after(
        &self,
        after: Option<&PageKey>,
        direction: Direction,
        limit: u32,
    ) -> Result<Vec<Page>> {
        db::fetch_pages_after(self.pool, after, direction, limit).await
    }
}

/// A published path flagged for sitemap inclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedPath(pub String);

impl Keyed for IndexedPath {
    type Key = String;

    fn sort_key(&self) -> String {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndexedPathSource<'a> {
    pool: &'a Pool,
}

impl<'a> IndexedPathSource<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl<'a> OrderedSource<IndexedPath> for IndexedPathSource<'a> {
    async fn fetch_after(
        &self,
        after: Option<&String>,
        direction: Direction,
        limit: u32,
    ) -> Result<Vec<IndexedPath>> {
        if direction != Direction::Ascending {
            return Err(anyhow!("indexed paths can only be scanned in ascending order"));
        }
        let paths = db::fetch_indexed_paths_after(self.pool, after.map(String::as_str), limit).await?;
        Ok(paths.into_iter().map(IndexedPath).collect())
    }
}
