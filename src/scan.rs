//! Bounded-page cursor scanning over ordered collections.
//!
//! A scan never holds more than one page. Ordering is the store's job: the
//! scanner only threads the sort key of the last item it saw into the next
//! cursor, and the caller decides how the next page gets invoked (normally as
//! a fresh task carrying the cursor).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ascending,
    Descending,
}

/// Position in an ordered scan. `after == None` means the start of the collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanCursor<K> {
    pub after: Option<K>,
    pub page_size: u32,
    pub direction: Direction,
}

impl<K> ScanCursor<K> {
    pub fn start(page_size: u32, direction: Direction) -> Self {
        Self {
            after: None,
            page_size,
            direction,
        }
    }

    pub fn is_start(&self) -> bool {
        self.after.is_none()
    }

    fn advance(&self, key: K) -> Self {
        Self {
            after: Some(key),
            page_size: self.page_size,
            direction: self.direction,
        }
    }
}

/// Items that expose a totally ordered sort key.
pub trait Keyed: Send + Sync {
    type Key: Clone + Ord + Send + Sync + fmt::Debug;

    fn sort_key(&self) -> Self::Key;
}

/// A store that can return items strictly after a key, in order, up to a limit.
#[async_trait]
pub trait OrderedSource<T: Keyed>: Send + Sync {
    async fn fetch_after(
        &self,
        after: Option<&T::Key>,
        direction: Direction,
        limit: u32,
    ) -> Result<Vec<T>>;
}

/// One fetched page. `next` is `None` once the scan is complete.
#[derive(Debug)]
pub struct ScanPage<T: Keyed> {
    pub items: Vec<T>,
    pub next: Option<ScanCursor<T::Key>>,
}

impl<T: Keyed> ScanPage<T> {
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Fetch the page that follows `cursor`.
///
/// A full page yields a continuation cursor positioned at its last item; a
/// short page ends the scan. Re-running with the same cursor returns the
/// same page, so retried invocations are safe.
pub async fn scan<T, S>(source: &S, cursor: &ScanCursor<T::Key>) -> Result<ScanPage<T>>
where
    T: Keyed,
    S: OrderedSource<T> + ?Sized,
{
    if cursor.page_size == 0 {
        return Err(anyhow!("scan page size must be at least 1"));
    }
    let items = source
        .fetch_after(cursor.after.as_ref(), cursor.direction, cursor.page_size)
        .await?;
    let page_size = cursor.page_size as usize;
    if items.len() > page_size {
        return Err(anyhow!(
            "ordered source returned {} items for a page of {}",
            items.len(),
            page_size
        ));
    }

    let next = if items.len() == page_size {
        items.last().map(|last| cursor.advance(last.sort_key()))
    } else {
        None
    };
    Ok(ScanPage { items, next })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Item(u32);

    impl Keyed for Item {
        type Key = u32;
        fn sort_key(&self) -> u32 {
            self.0
        }
    }

    struct VecSource {
        items: Vec<Item>,
        fetches: AtomicUsize,
    }

    impl VecSource {
        fn new(n: u32) -> Self {
            Self {
                items: (1..=n).map(Item).collect(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OrderedSource<Item> for VecSource {
        async fn fetch_after(
            &self,
            after: Option<&u32>,
            direction: Direction,
            limit: u32,
        ) -> Result<Vec<Item>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut items: Vec<Item> = match direction {
                Direction::Ascending => self
                    .items
                    .iter()
                    .filter(|i| after.map_or(true, |a| i.0 > *a))
                    .cloned()
                    .collect(),
                Direction::Descending => self
                    .items
                    .iter()
                    .rev()
                    .filter(|i| after.map_or(true, |a| i.0 < *a))
                    .cloned()
                    .collect(),
            };
            items.truncate(limit as usize);
            Ok(items)
        }
    }

    async fn drain(source: &VecSource, page_size: u32, direction: Direction) -> (Vec<u32>, Vec<Option<u32>>) {
        let mut cursor = ScanCursor::start(page_size, direction);
        let mut seen = Vec::new();
        let mut cursors = Vec::new();
        loop {
            cursors.push(cursor.after);
            let page: ScanPage<Item> = scan(source, &cursor).await.unwrap();
            seen.extend(page.items.iter().map(|i| i.0));
            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }
        (seen, cursors)
    }

    #[tokio::test]
    async fn forty_five_items_in_pages_of_twenty() {
        let source = VecSource::new(45);
        let (seen, cursors) = drain(&source, 20, Direction::Ascending).await;
        assert_eq!(cursors, vec![None, Some(20), Some(40)]);
        assert_eq!(seen, (1..=45).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn every_item_visited_once_in_order() {
        for n in 0..=23u32 {
            for p in 1..=7u32 {
                let source = VecSource::new(n);
                let (seen, _) = drain(&source, p, Direction::Ascending).await;
                assert_eq!(seen, (1..=n).collect::<Vec<_>>(), "n={n} p={p}");

                let non_empty_pages = n.div_ceil(p) as usize;
                let fetches = source.fetches.load(Ordering::SeqCst);
                // a page that is exactly full cannot signal the end by itself
                let expected = if n % p == 0 { non_empty_pages + 1 } else { non_empty_pages };
                assert_eq!(fetches, expected, "n={n} p={p}");
            }
        }
    }

    #[tokio::test]
    async fn descending_scan_walks_newest_first() {
        let source = VecSource::new(5);
        let (seen, cursors) = drain(&source, 2, Direction::Descending).await;
        assert_eq!(seen, vec![5, 4, 3, 2, 1]);
        assert_eq!(cursors, vec![None, Some(4), Some(2)]);
    }

    #[tokio::test]
    async fn refetching_from_same_cursor_is_stable() {
        let source = VecSource::new(10);
        let cursor = ScanCursor {
            after: Some(3),
            page_size: 4,
            direction: Direction::Ascending,
        };
        let a: ScanPage<Item> = scan(&source, &cursor).await.unwrap();
        let b: ScanPage<Item> = scan(&source, &cursor).await.unwrap();
        assert_eq!(a.items, b.items);
        assert_eq!(a.next, b.next);
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected() {
        let source = VecSource::new(3);
        let cursor = ScanCursor::start(0, Direction::Ascending);
        assert!(scan::<Item, _>(&source, &cursor).await.is_err());
    }
}
