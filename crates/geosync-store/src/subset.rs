//! Index translation between a full collection and a filtered subset view.
//!
//! A live collection usually carries members the store (or a legend panel, or
//! a tree loader) does not show. These functions translate positions between
//! the full ordered collection and the filtered ordered subset. They are
//! deliberately standalone: the synchronizers use them to compute insertion
//! and reorder targets, and presentation code reuses them for its own
//! filtered views.

/// Insertion index into the subset for the member at `full_index`.
///
/// `subset_len` is the subset's current size *excluding* the member in
/// question (a member being added is not yet in the subset; a member being
/// reordered is counted as removed first). The walk starts at the end of the
/// full collection and moves toward `full_index`, counting accepted members;
/// it stops early once the count reaches `subset_len`, which clamps the
/// result to the last valid position when the subset lags behind a
/// fast-changing collection (late asynchronous events).
pub fn subset_index<T>(
    items: &[T],
    full_index: usize,
    subset_len: usize,
    accept: impl Fn(&T) -> bool,
) -> usize {
    let mut after = 0usize;
    for (i, item) in items.iter().enumerate().rev() {
        if i <= full_index || after >= subset_len {
            break;
        }
        if accept(item) {
            after += 1;
        }
    }
    subset_len.saturating_sub(after)
}

/// Position of the member at `full_index` within the filtered subset.
///
/// `None` when `full_index` is out of range or the member is not accepted.
pub fn position_in_subset<T>(
    items: &[T],
    full_index: usize,
    accept: impl Fn(&T) -> bool,
) -> Option<usize> {
    let item = items.get(full_index)?;
    if !accept(item) {
        return None;
    }
    Some(items[..full_index].iter().filter(|i| accept(i)).count())
}

/// Full-collection index of the `subset_pos`-th accepted member.
///
/// The inverse of [`position_in_subset`]. `None` when the subset has no
/// member at `subset_pos`.
pub fn full_index<T>(
    items: &[T],
    subset_pos: usize,
    accept: impl Fn(&T) -> bool,
) -> Option<usize> {
    let mut seen = 0usize;
    for (i, item) in items.iter().enumerate() {
        if accept(item) {
            if seen == subset_pos {
                return Some(i);
            }
            seen += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // Items are (value, accepted) pairs.
    fn accepted(item: &(u8, bool)) -> bool {
        item.1
    }

    #[test]
    fn position_skips_rejected_members() {
        let items = [(0, true), (1, false), (2, true), (3, false), (4, true)];
        assert_eq!(position_in_subset(&items, 0, accepted), Some(0));
        assert_eq!(position_in_subset(&items, 2, accepted), Some(1));
        assert_eq!(position_in_subset(&items, 4, accepted), Some(2));
        assert_eq!(position_in_subset(&items, 1, accepted), None);
        assert_eq!(position_in_subset(&items, 9, accepted), None);
    }

    #[test]
    fn insertion_index_counts_members_after() {
        // Subset currently holds the two accepted members around index 2.
        let items = [(0, true), (1, false), (2, true), (3, true)];
        // Member at index 2 not yet in the subset of size 2: one accepted
        // member after it, so it lands at 2 - 1 = 1.
        assert_eq!(subset_index(&items, 2, 2, |i| accepted(i) && i.0 != 2), 1);
        // Member at the end: nothing after, appends.
        assert_eq!(subset_index(&items, 3, 2, |i| accepted(i) && i.0 != 3), 2);
        // Member at the front: everything after, prepends.
        assert_eq!(subset_index(&items, 0, 2, |i| accepted(i) && i.0 != 0), 0);
    }

    #[test]
    fn insertion_index_clamps_to_subset_len() {
        // Subset lags: collection has four accepted members, subset only one.
        let items = [(0, true), (1, true), (2, true), (3, true)];
        assert_eq!(subset_index(&items, 0, 1, accepted), 0);
        assert_eq!(subset_index(&items, 3, 1, accepted), 1);
    }

    #[test]
    fn full_index_inverse() {
        let items = [(0, false), (1, true), (2, false), (3, true)];
        assert_eq!(full_index(&items, 0, accepted), Some(1));
        assert_eq!(full_index(&items, 1, accepted), Some(3));
        assert_eq!(full_index(&items, 2, accepted), None);
        assert_eq!(full_index(&[] as &[(u8, bool)], 0, accepted), None);
    }

    proptest! {
        #[test]
        fn position_matches_naive_filter(items in prop::collection::vec((any::<u8>(), any::<bool>()), 0..32)) {
            let naive: Vec<usize> = items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.1)
                .map(|(i, _)| i)
                .collect();
            for (pos, &i) in naive.iter().enumerate() {
                prop_assert_eq!(position_in_subset(&items, i, accepted), Some(pos));
                prop_assert_eq!(full_index(&items, pos, accepted), Some(i));
            }
        }

        #[test]
        fn insertion_never_exceeds_subset_len(
            items in prop::collection::vec((any::<u8>(), any::<bool>()), 0..32),
            full in 0usize..32,
            len in 0usize..32,
        ) {
            prop_assert!(subset_index(&items, full, len, accepted) <= len);
        }

        #[test]
        fn insertion_agrees_with_position_for_members(
            items in prop::collection::vec((any::<u8>(), any::<bool>()), 1..32),
            full in 0usize..31,
        ) {
            // Treating the member at `full` as removed-then-reinserted, the
            // insertion index equals its filtered position.
            if full < items.len() && items[full].1 {
                let subset_len = items.iter().filter(|i| i.1).count() - 1;
                let without_self = |i: &(u8, bool)| i.1 && !std::ptr::eq(i, &items[full]);
                let inserted = subset_index(&items, full, subset_len, without_self);
                prop_assert_eq!(Some(inserted), position_in_subset(&items, full, |i| i.1));
            }
        }
    }
}
