//! Per-payload packet reorderer: stitches out-of-order fragments of one
//! payload into an ordered scatter-gather list.
//!
//! The data structure is a doubly-linked list of [`Run`]s allocated from a
//! pool, sorted by sequence number. A run is a maximal contiguous range of
//! sequence numbers `[top, bot]` whose fragments, concatenated, form a
//! contiguous byte range of the payload. Runs merge as soon as they become
//! adjacent, so lossless in-order delivery keeps exactly one run per
//! payload and each insertion costs O(runs-so-far).
//!
//! Invariants: runs are strictly ordered by sequence number, never
//! overlap, and are never adjacent (adjacent runs merge at insertion).

use bytes::Bytes;
use tracing::warn;

use crate::{
    pool::{Pool, PoolHandle},
    sgl::Sgl,
};

/// One contiguous range of received sequence numbers within a payload.
#[derive(Debug, Default)]
pub(crate) struct Run {
    /// First sequence number covered by this run.
    pub top: u16,
    /// Last sequence number covered by this run.
    pub bot: u16,
    /// The fragments of `[top, bot]`, in sequence order.
    pub sgl: Sgl,
    /// Previous run (smaller sequence numbers), if any.
    pub prev: Option<PoolHandle>,
    /// Next run (larger sequence numbers), if any.
    pub next: Option<PoolHandle>,
}

/// Where an inserted fragment ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    /// The fragment was attached to the run list.
    Inserted,
    /// A fragment with this sequence number was already present; the
    /// duplicate was dropped.
    Duplicate,
}

/// The run pool had no free node for a fragment that needed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("run pool exhausted")]
pub(crate) struct RunPoolExhausted;

/// Inserts the fragment for sequence number `seq` into the run list at
/// `head`, merging runs that become adjacent.
pub(crate) fn insert_fragment(
    runs: &mut Pool<Run>,
    head: &mut Option<PoolHandle>,
    seq: u16,
    fragment: Bytes,
) -> Result<InsertOutcome, RunPoolExhausted> {
    let seq_wide = u32::from(seq);
    let mut prev: Option<PoolHandle> = None;
    let mut cursor = *head;

    while let Some(current) = cursor {
        let (top, bot, next) = {
            let run = runs.item(current);
            (u32::from(run.top), u32::from(run.bot), run.next)
        };

        if seq_wide + 1 < top {
            // a gap remains below this run; a new run goes in front of it
            break;
        }
        if seq_wide + 1 == top {
            let run = runs.item_mut(current);
            run.sgl.prepend(fragment);
            run.top = seq;
            // no merge with the previous run is possible here: that case
            // was the append branch when the walk visited it
            return Ok(InsertOutcome::Inserted);
        }
        if seq_wide <= bot {
            warn!(seq, "duplicate packet fragment dropped");
            return Ok(InsertOutcome::Duplicate);
        }
        if seq_wide == bot + 1 {
            {
                let run = runs.item_mut(current);
                run.sgl.append(fragment);
                run.bot = seq;
            }
            merge_with_next(runs, current);
            return Ok(InsertOutcome::Inserted);
        }

        prev = Some(current);
        cursor = next;
    }

    // no run could absorb the fragment; it starts a run of its own,
    // spliced in between `prev` and `cursor`
    let Some(handle) = runs.get() else {
        return Err(RunPoolExhausted);
    };
    {
        let run = runs.item_mut(handle);
        debug_assert!(run.sgl.fragment_count() == 0, "recycled run not cleared");
        run.top = seq;
        run.bot = seq;
        run.sgl.append(fragment);
        run.prev = prev;
        run.next = cursor;
    }
    match prev {
        Some(prev) => runs.item_mut(prev).next = Some(handle),
        None => *head = Some(handle),
    }
    if let Some(next) = cursor {
        runs.item_mut(next).prev = Some(handle);
    }
    Ok(InsertOutcome::Inserted)
}

/// Splices `current`'s successor onto `current` if the two runs have
/// become adjacent, releasing the successor's node.
fn merge_with_next(runs: &mut Pool<Run>, current: PoolHandle) {
    let Some(next) = runs.item(current).next else {
        return;
    };
    if u32::from(runs.item(current).bot) + 1 != u32::from(runs.item(next).top) {
        return;
    }

    let mut spliced = std::mem::take(&mut runs.item_mut(next).sgl);
    let (next_bot, after) = {
        let run = runs.item(next);
        (run.bot, run.next)
    };
    {
        let run = runs.item_mut(current);
        run.sgl.extend_from(&mut spliced);
        run.bot = next_bot;
        run.next = after;
    }
    // hand the (empty) container back so the node recycles cleanly
    runs.item_mut(next).sgl = spliced;
    if let Some(after) = after {
        runs.item_mut(after).prev = Some(current);
    }
    release_run(runs, next);
}

/// Releases one run node, clearing it for reuse. Returns the number of
/// fragments it held.
fn release_run(runs: &mut Pool<Run>, handle: PoolHandle) -> usize {
    let run = runs.item_mut(handle);
    let fragments = run.sgl.fragment_count();
    run.sgl.clear();
    run.prev = None;
    run.next = None;
    run.top = 0;
    run.bot = 0;
    runs.put(handle);
    fragments
}

/// Releases every run in the list at `head`, returning the total number
/// of fragments that were still buffered.
pub(crate) fn release_all(runs: &mut Pool<Run>, head: &mut Option<PoolHandle>) -> usize {
    let mut fragments = 0;
    let mut cursor = head.take();
    while let Some(current) = cursor {
        cursor = runs.item(current).next;
        fragments += release_run(runs, current);
    }
    fragments
}

/// If the list at `head` is a single run starting at sequence 0, takes
/// its assembled scatter-gather list and releases the node.
pub(crate) fn take_if_single_from_zero(
    runs: &mut Pool<Run>,
    head: &mut Option<PoolHandle>,
) -> Option<Sgl> {
    let handle = (*head)?;
    {
        let run = runs.item(handle);
        if run.top != 0 || run.next.is_some() {
            return None;
        }
    }
    let sgl = std::mem::take(&mut runs.item_mut(handle).sgl);
    *head = None;
    release_run(runs, handle);
    Some(sgl)
}

/// Whether the list at `head` is a single run covering `[0, last]`.
pub(crate) fn is_single_from_zero(runs: &Pool<Run>, head: Option<PoolHandle>) -> bool {
    head.is_some_and(|handle| {
        let run = runs.item(handle);
        run.top == 0 && run.next.is_none()
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn pool() -> Pool<Run> {
        Pool::new("runs", 8, 0, 0, Run::default)
    }

    fn frag(byte: u8) -> Bytes {
        Bytes::from(vec![byte; 3])
    }

    fn shape(runs: &Pool<Run>, head: Option<PoolHandle>) -> Vec<(u16, u16, usize)> {
        let mut out = Vec::new();
        let mut cursor = head;
        while let Some(handle) = cursor {
            let run = runs.item(handle);
            out.push((run.top, run.bot, run.sgl.len()));
            cursor = run.next;
        }
        out
    }

    #[test]
    fn in_order_keeps_one_run() {
        let mut runs = pool();
        let mut head = None;
        for seq in 0..4 {
            assert_matches!(
                insert_fragment(&mut runs, &mut head, seq, frag(seq as u8)),
                Ok(InsertOutcome::Inserted)
            );
        }
        assert_eq!(vec![(0, 3, 12)], shape(&runs, head));
        assert_eq!(7, runs.free_count());
        assert!(is_single_from_zero(&runs, head));
    }

    #[test]
    fn reverse_order_keeps_one_run() {
        let mut runs = pool();
        let mut head = None;
        for seq in (0..4).rev() {
            insert_fragment(&mut runs, &mut head, seq, frag(seq as u8)).unwrap();
        }
        assert_eq!(vec![(0, 3, 12)], shape(&runs, head));
        assert!(is_single_from_zero(&runs, head));
    }

    #[test]
    fn gap_makes_two_runs_then_merges() {
        let mut runs = pool();
        let mut head = None;
        insert_fragment(&mut runs, &mut head, 2, frag(2)).unwrap();
        insert_fragment(&mut runs, &mut head, 0, frag(0)).unwrap();
        assert_eq!(vec![(0, 0, 3), (2, 2, 3)], shape(&runs, head));
        assert!(!is_single_from_zero(&runs, head));

        insert_fragment(&mut runs, &mut head, 1, frag(1)).unwrap();
        assert_eq!(vec![(0, 2, 9)], shape(&runs, head));
        assert_eq!(7, runs.free_count());
    }

    #[test]
    fn bytes_assemble_in_sequence_order() {
        let mut runs = pool();
        let mut head = None;
        for seq in [2u16, 0, 3, 1] {
            insert_fragment(&mut runs, &mut head, seq, frag(seq as u8)).unwrap();
        }
        let sgl = take_if_single_from_zero(&mut runs, &mut head).unwrap();
        assert_eq!(vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3], sgl.to_vec());
        assert_eq!(None, head);
        assert_eq!(8, runs.free_count());
    }

    #[test]
    fn duplicate_is_dropped() {
        let mut runs = pool();
        let mut head = None;
        insert_fragment(&mut runs, &mut head, 1, frag(1)).unwrap();
        assert_matches!(
            insert_fragment(&mut runs, &mut head, 1, frag(9)),
            Ok(InsertOutcome::Duplicate)
        );
        assert_eq!(vec![(1, 1, 3)], shape(&runs, head));
    }

    #[test]
    fn single_run_not_from_zero_is_incomplete() {
        let mut runs = pool();
        let mut head = None;
        insert_fragment(&mut runs, &mut head, 1, frag(1)).unwrap();
        insert_fragment(&mut runs, &mut head, 2, frag(2)).unwrap();
        assert!(!is_single_from_zero(&runs, head));
        assert_eq!(None, take_if_single_from_zero(&mut runs, &mut head));
    }

    #[test]
    fn far_apart_runs_stay_sorted() {
        let mut runs = pool();
        let mut head = None;
        for seq in [10u16, 4, 7, 0] {
            insert_fragment(&mut runs, &mut head, seq, frag(seq as u8)).unwrap();
        }
        assert_eq!(
            vec![(0, 0, 3), (4, 4, 3), (7, 7, 3), (10, 10, 3)],
            shape(&runs, head)
        );
    }

    #[test]
    fn pool_exhaustion_reported() {
        let mut runs = Pool::new("runs", 1, 0, 0, Run::default);
        let mut head = None;
        insert_fragment(&mut runs, &mut head, 0, frag(0)).unwrap();
        // seq 2 is not adjacent, so it needs a second node
        assert_matches!(
            insert_fragment(&mut runs, &mut head, 2, frag(2)),
            Err(RunPoolExhausted)
        );
        // adjacent fragments still attach without a new node
        insert_fragment(&mut runs, &mut head, 1, frag(1)).unwrap();
        assert_eq!(vec![(0, 1, 6)], shape(&runs, head));
    }

    #[test]
    fn release_all_returns_fragment_count() {
        let mut runs = pool();
        let mut head = None;
        for seq in [0u16, 1, 5, 6, 9] {
            insert_fragment(&mut runs, &mut head, seq, frag(0)).unwrap();
        }
        assert_eq!(5, release_all(&mut runs, &mut head));
        assert_eq!(None, head);
        assert_eq!(8, runs.free_count());
    }

    #[test]
    fn permutations_of_six() {
        // every arrival order over six packets assembles identically
        fn permute(seqs: &mut Vec<u16>, k: usize, out: &mut Vec<Vec<u16>>) {
            if k == seqs.len() {
                out.push(seqs.clone());
                return;
            }
            for i in k..seqs.len() {
                seqs.swap(k, i);
                permute(seqs, k + 1, out);
                seqs.swap(k, i);
            }
        }
        let mut orders = Vec::new();
        permute(&mut (0u16..6).collect(), 0, &mut orders);
        assert_eq!(720, orders.len());

        for order in orders {
            let mut runs = pool();
            let mut head = None;
            for &seq in &order {
                insert_fragment(&mut runs, &mut head, seq, frag(seq as u8)).unwrap();
            }
            let sgl = take_if_single_from_zero(&mut runs, &mut head)
                .unwrap_or_else(|| panic!("order {order:?} did not assemble"));
            let expect: Vec<u8> = (0u8..6).flat_map(|b| [b, b, b]).collect();
            assert_eq!(expect, sgl.to_vec(), "order {order:?}");
            assert_eq!(8, runs.free_count());
        }
    }
}
