//! Parent-linked comment lists grouped into a tree.

use crate::model::{ImportedComment, ROOT_PARENT};
use std::collections::{HashMap, HashSet};

/// Comments of one article grouped by parent id, siblings in source order.
#[derive(Debug, Default)]
pub struct CommentTree {
    by_parent: HashMap<i64, Vec<ImportedComment>>,
    ids: HashSet<i64>,
}

impl CommentTree {
    pub fn build<I>(comments: I) -> Self
    where
        I: IntoIterator<Item = ImportedComment>,
    {
        let mut tree = Self::default();
        for comment in comments {
            tree.ids.insert(comment.id);
            tree.by_parent.entry(comment.parent).or_default().push(comment);
        }
        tree
    }

    pub fn roots(&self) -> &[ImportedComment] {
        self.children_of(ROOT_PARENT)
    }

    pub fn children_of(&self, id: i64) -> &[ImportedComment] {
        self.by_parent.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every comment below `id`, depth first, siblings in source order.
    /// A cycle in the parent links is cut at the first repeated id.
    pub fn descendants_of(&self, id: i64) -> Vec<ImportedComment> {
        let mut out = Vec::new();
        let mut visited = HashSet::from([id]);
        let mut stack: Vec<&ImportedComment> = self.children_of(id).iter().rev().collect();
        while let Some(comment) = stack.pop() {
            if !visited.insert(comment.id) {
                continue;
            }
            out.push(comment.clone());
            stack.extend(self.children_of(comment.id).iter().rev());
        }
        out
    }

    /// Comments that no walk from the roots reaches, sorted by id.
    /// Covers orphans with their replies as well as parent cycles.
    pub fn unreachable(&self) -> Vec<&ImportedComment> {
        let mut reached: HashSet<i64> = HashSet::new();
        for root in self.roots() {
            reached.insert(root.id);
            reached.extend(self.descendants_of(root.id).iter().map(|c| c.id));
        }
        let mut skipped: Vec<&ImportedComment> = self
            .by_parent
            .values()
            .flatten()
            .filter(|c| !reached.contains(&c.id))
            .collect();
        skipped.sort_by_key(|c| c.id);
        skipped
    }

    /// Whether `parent` names a comment in this list.
    pub fn contains(&self, parent: i64) -> bool {
        self.ids.contains(&parent)
    }
}
