//! Property tests for the dense chapter ordering.
//!
//! Random insert/move/delete sequences are applied through the pure planners
//! and mirrored on an `OrderIndex`; after every step the collection must be
//! exactly `1..=N` and agree with the index.

use proptest::prelude::*;
use quire_core::{
    append_order, check_dense, compact_after_delete, move_chapter, Chapter, OrderIndex,
};
use quire_types::{BookId, ChapterId};

#[derive(Debug, Clone)]
enum Op {
    Insert,
    Move { pick: usize, to: usize },
    Delete { pick: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Insert),
        (any::<usize>(), any::<usize>()).prop_map(|(pick, to)| Op::Move { pick, to }),
        any::<usize>().prop_map(|pick| Op::Delete { pick }),
    ]
}

fn layout(chapters: &[Chapter]) -> Vec<ChapterId> {
    let mut sorted = chapters.to_vec();
    sorted.sort_by_key(|c| c.order);
    sorted.into_iter().map(|c| c.id).collect()
}

proptest! {
    #[test]
    fn density_holds_after_every_operation(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let book = BookId::new("book");
        let mut chapters: Vec<Chapter> = Vec::new();
        let mut index = OrderIndex::new();

        for op in ops {
            match op {
                Op::Insert => {
                    let order = append_order(&chapters);
                    let chapter = Chapter::new(book.clone(), "untitled", None, order);
                    prop_assert_eq!(index.append(chapter.id.clone()), order);
                    chapters.push(chapter);
                }
                Op::Move { pick, to } => {
                    if chapters.is_empty() {
                        continue;
                    }
                    let id = chapters[pick % chapters.len()].id.clone();
                    let target = (to % chapters.len()) as i64 + 1;
                    let (moved, plan) = move_chapter(&chapters, &id, target).unwrap();
                    let (old, new) = index.move_to(&id, target).unwrap();
                    if old == new {
                        prop_assert!(plan.is_empty());
                    } else {
                        // Only the span between old and new is rewritten.
                        prop_assert_eq!(plan.len() as u32, old.abs_diff(new) + 1);
                    }
                    chapters = moved;
                }
                Op::Delete { pick } => {
                    if chapters.is_empty() {
                        continue;
                    }
                    let id = chapters[pick % chapters.len()].id.clone();
                    let (survivors, plan) = compact_after_delete(&chapters, &id).unwrap();
                    index.remove(&id).unwrap();
                    prop_assert_eq!(plan.len(), survivors.len());
                    chapters = survivors;
                }
            }

            prop_assert!(check_dense(&chapters).is_ok());
            prop_assert_eq!(layout(&chapters), index.ids().to_vec());
        }
    }

    #[test]
    fn moving_in_place_is_identity(n in 1usize..12, pick in any::<usize>()) {
        let book = BookId::new("book");
        let chapters: Vec<Chapter> = (1..=n as u32)
            .map(|order| Chapter::new(book.clone(), format!("ch{order}"), None, order))
            .collect();
        let target = &chapters[pick % n];

        let (moved, plan) = move_chapter(&chapters, &target.id, target.order as i64).unwrap();
        prop_assert_eq!(moved, chapters.clone());
        prop_assert!(plan.is_empty());
    }

    #[test]
    fn out_of_range_moves_leave_input_untouched(n in 1usize..8, bad in prop_oneof![(-50i64..=0), (9i64..60)]) {
        let book = BookId::new("book");
        let chapters: Vec<Chapter> = (1..=n as u32)
            .map(|order| Chapter::new(book.clone(), "c", None, order))
            .collect();
        let before = chapters.clone();

        prop_assert!(move_chapter(&chapters, &chapters[0].id, bad).is_err());
        prop_assert_eq!(chapters, before);
    }
}
