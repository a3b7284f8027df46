//! Dense chapter ordering.
//!
//! Every chapter of a book carries an `order` in `1..=N` and the values form
//! exactly that set at rest. The functions here are pure: they take the
//! current collection, return the re-sorted collection the operation should
//! produce, and describe the store writes needed to get there as an
//! [`OrderPlan`]. Applying the plan is the caller's business.

use std::collections::HashSet;

use quire_types::ChapterId;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Chapter;

/// One order-field write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub chapter_id: ChapterId,
    pub from: u32,
    pub to: u32,
}

/// Batch of order-field writes that takes a book from one dense sequence to
/// another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlan {
    pub updates: Vec<OrderUpdate>,
}

impl OrderPlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Update targeting `id`, if any.
    pub fn update_for(&self, id: &ChapterId) -> Option<&OrderUpdate> {
        self.updates.iter().find(|u| &u.chapter_id == id)
    }
}

/// The order sequence of one book: position `i` holds the chapter whose
/// order is `i + 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderIndex {
    ids: Vec<ChapterId>,
}

impl OrderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from stored chapters, failing unless their orders are
    /// exactly `1..=N` with no duplicates.
    pub fn from_chapters(chapters: &[Chapter]) -> Result<Self> {
        let mut sorted: Vec<&Chapter> = chapters.iter().collect();
        sorted.sort_by_key(|c| c.order);

        let mut seen = HashSet::with_capacity(sorted.len());
        for (i, chapter) in sorted.iter().enumerate() {
            let expected = i as u32 + 1;
            if chapter.order != expected {
                return Err(inconsistent(
                    chapters,
                    format!(
                        "expected order {expected} at position {}, found {} ({})",
                        i + 1,
                        chapter.order,
                        chapter.id
                    ),
                ));
            }
            if !seen.insert(&chapter.id) {
                return Err(inconsistent(
                    chapters,
                    format!("chapter {} listed twice", chapter.id),
                ));
            }
        }

        Ok(Self {
            ids: sorted.into_iter().map(|c| c.id.clone()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Chapter ids in order.
    pub fn ids(&self) -> &[ChapterId] {
        &self.ids
    }

    /// 1-based order of `id`.
    pub fn position(&self, id: &ChapterId) -> Option<u32> {
        self.ids.iter().position(|c| c == id).map(|i| i as u32 + 1)
    }

    /// Append at `N + 1` and return that order.
    pub fn append(&mut self, id: ChapterId) -> u32 {
        self.ids.push(id);
        self.ids.len() as u32
    }

    /// Move `id` to `new_order`, returning `(old, new)`.
    pub fn move_to(&mut self, id: &ChapterId, new_order: i64) -> Result<(u32, u32)> {
        let old = self
            .position(id)
            .ok_or_else(|| Error::chapter_not_found(id))?;
        let new = validate_position(new_order, self.ids.len())?;
        if old != new {
            let moved = self.ids.remove(old as usize - 1);
            self.ids.insert(new as usize - 1, moved);
        }
        Ok((old, new))
    }

    /// Remove `id`, closing the gap; returns its old order.
    pub fn remove(&mut self, id: &ChapterId) -> Result<u32> {
        let old = self
            .position(id)
            .ok_or_else(|| Error::chapter_not_found(id))?;
        self.ids.remove(old as usize - 1);
        Ok(old)
    }
}

/// Order a newly created chapter receives: `N + 1`.
pub fn append_order(chapters: &[Chapter]) -> u32 {
    chapters.len() as u32 + 1
}

/// Verify that `chapters` satisfy the dense-sequence invariant.
pub fn check_dense(chapters: &[Chapter]) -> Result<()> {
    OrderIndex::from_chapters(chapters).map(|_| ())
}

/// Move one chapter to `new_order`.
///
/// Chapters strictly between the old and new positions shift by one towards
/// the vacated slot; the mover takes `new_order`. The returned collection is
/// sorted by order and the plan lists only chapters whose order changed.
/// Errors leave the input untouched.
pub fn move_chapter(
    chapters: &[Chapter],
    chapter_id: &ChapterId,
    new_order: i64,
) -> Result<(Vec<Chapter>, OrderPlan)> {
    let old = chapters
        .iter()
        .find(|c| &c.id == chapter_id)
        .map(|c| c.order)
        .ok_or_else(|| Error::chapter_not_found(chapter_id))?;
    let new = validate_position(new_order, chapters.len())?;

    let mut moved = chapters.to_vec();
    let mut plan = OrderPlan::default();

    if old != new {
        for chapter in moved.iter_mut() {
            let from = chapter.order;
            let to = if &chapter.id == chapter_id {
                new
            } else if old < new && from > old && from <= new {
                from - 1
            } else if old > new && from >= new && from < old {
                from + 1
            } else {
                from
            };

            if to != from {
                chapter.order = to;
                plan.updates.push(OrderUpdate {
                    chapter_id: chapter.id.clone(),
                    from,
                    to,
                });
            }
        }
    }

    sort_by_order(&mut moved);
    plan.updates.sort_by_key(|u| u.to);
    Ok((moved, plan))
}

/// Remove a chapter and renumber the survivors `1..=N-1`.
///
/// The plan carries one write per surviving chapter, which also repairs any
/// drift the stored sequence had picked up.
pub fn compact_after_delete(
    chapters: &[Chapter],
    chapter_id: &ChapterId,
) -> Result<(Vec<Chapter>, OrderPlan)> {
    if !chapters.iter().any(|c| &c.id == chapter_id) {
        return Err(Error::chapter_not_found(chapter_id));
    }

    let mut survivors: Vec<Chapter> = chapters
        .iter()
        .filter(|c| &c.id != chapter_id)
        .cloned()
        .collect();
    sort_by_order(&mut survivors);

    let mut plan = OrderPlan::default();
    for (i, chapter) in survivors.iter_mut().enumerate() {
        let to = i as u32 + 1;
        plan.updates.push(OrderUpdate {
            chapter_id: chapter.id.clone(),
            from: chapter.order,
            to,
        });
        chapter.order = to;
    }

    Ok((survivors, plan))
}

/// Rebuild a dense sequence from whatever the store holds.
///
/// Recovery path after a partially applied reorder: chapters are ranked by
/// their stored order, ties broken by creation time and then id, and only
/// chapters whose order changes are planned.
pub fn recompact(chapters: &[Chapter]) -> (Vec<Chapter>, OrderPlan) {
    let mut ranked = chapters.to_vec();
    sort_by_order(&mut ranked);

    let mut plan = OrderPlan::default();
    for (i, chapter) in ranked.iter_mut().enumerate() {
        let to = i as u32 + 1;
        if chapter.order != to {
            plan.updates.push(OrderUpdate {
                chapter_id: chapter.id.clone(),
                from: chapter.order,
                to,
            });
            chapter.order = to;
        }
    }

    (ranked, plan)
}

fn sort_by_order(chapters: &mut [Chapter]) {
    chapters.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn validate_position(requested: i64, len: usize) -> Result<u32> {
    if requested < 1 || requested > len as i64 {
        return Err(Error::InvalidOrder { requested, len });
    }
    Ok(requested as u32)
}

fn inconsistent(chapters: &[Chapter], detail: String) -> Error {
    Error::InconsistentOrder {
        book_id: chapters
            .first()
            .map(|c| c.book_id.to_string())
            .unwrap_or_default(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use quire_types::BookId;

    fn chapter(id: &str, order: u32) -> Chapter {
        Chapter {
            id: ChapterId::new(id),
            book_id: BookId::new("book"),
            title: id.to_string(),
            content: None,
            word_count: 0,
            order,
            created_at: Utc.timestamp_opt(1_700_000_000 + order as i64, 0).unwrap(),
            last_autosave: None,
        }
    }

    fn abcd() -> Vec<Chapter> {
        vec![chapter("A", 1), chapter("B", 2), chapter("C", 3), chapter("D", 4)]
    }

    fn layout(chapters: &[Chapter]) -> Vec<(String, u32)> {
        chapters
            .iter()
            .map(|c| (c.id.to_string(), c.order))
            .collect()
    }

    fn pairs(items: &[(&str, u32)]) -> Vec<(String, u32)> {
        items.iter().map(|(id, o)| (id.to_string(), *o)).collect()
    }

    #[test]
    fn test_move_earlier() {
        let (moved, plan) = move_chapter(&abcd(), &ChapterId::new("D"), 2).unwrap();
        assert_eq!(
            layout(&moved),
            pairs(&[("A", 1), ("D", 2), ("B", 3), ("C", 4)])
        );
        // A keeps its place, so only three writes.
        assert_eq!(plan.len(), 3);
        assert!(plan.update_for(&ChapterId::new("A")).is_none());
        assert_eq!(
            plan.update_for(&ChapterId::new("D")),
            Some(&OrderUpdate {
                chapter_id: ChapterId::new("D"),
                from: 4,
                to: 2
            })
        );
    }

    #[test]
    fn test_move_later() {
        let (moved, plan) = move_chapter(&abcd(), &ChapterId::new("A"), 3).unwrap();
        assert_eq!(
            layout(&moved),
            pairs(&[("B", 1), ("C", 2), ("A", 3), ("D", 4)])
        );
        assert_eq!(plan.len(), 3);
        assert!(plan.update_for(&ChapterId::new("D")).is_none());
    }

    #[test]
    fn test_move_to_same_position_is_noop() {
        let input = abcd();
        let (moved, plan) = move_chapter(&input, &ChapterId::new("C"), 3).unwrap();
        assert_eq!(moved, input);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_move_rejects_out_of_range() {
        let input = abcd();
        for bad in [0, 5, -1] {
            let err = move_chapter(&input, &ChapterId::new("A"), bad).unwrap_err();
            assert!(matches!(err, Error::InvalidOrder { requested, len: 4 } if requested == bad));
        }
    }

    #[test]
    fn test_move_unknown_chapter() {
        let err = move_chapter(&abcd(), &ChapterId::new("Z"), 1).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_delete_compaction() {
        let input = vec![chapter("A", 1), chapter("B", 2), chapter("C", 3)];
        let (survivors, plan) = compact_after_delete(&input, &ChapterId::new("B")).unwrap();
        assert_eq!(layout(&survivors), pairs(&[("A", 1), ("C", 2)]));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.update_for(&ChapterId::new("C")).unwrap().to, 2);
    }

    #[test]
    fn test_delete_last_chapter() {
        let input = vec![chapter("A", 1)];
        let (survivors, plan) = compact_after_delete(&input, &ChapterId::new("A")).unwrap();
        assert!(survivors.is_empty());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_recompact_repairs_gaps_and_duplicates() {
        let input = vec![chapter("A", 1), chapter("B", 3), chapter("C", 3), chapter("D", 7)];
        assert!(check_dense(&input).is_err());

        let (fixed, plan) = recompact(&input);
        check_dense(&fixed).unwrap();
        assert_eq!(
            layout(&fixed),
            pairs(&[("A", 1), ("B", 2), ("C", 3), ("D", 4)])
        );
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_index_tracks_moves() {
        let mut index = OrderIndex::from_chapters(&abcd()).unwrap();
        assert_eq!(index.move_to(&ChapterId::new("D"), 2).unwrap(), (4, 2));
        assert_eq!(index.position(&ChapterId::new("B")), Some(3));
        assert_eq!(index.remove(&ChapterId::new("A")).unwrap(), 1);
        assert_eq!(index.append(ChapterId::new("E")), 4);
        let ids: Vec<&str> = index.ids().iter().map(|c| c.as_str()).collect();
        assert_eq!(ids, ["D", "B", "C", "E"]);
    }

    #[test]
    fn test_append_order() {
        assert_eq!(append_order(&[]), 1);
        assert_eq!(append_order(&abcd()), 5);
    }
}
