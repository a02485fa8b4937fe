use std::collections::HashMap;

/// One fused document with its per-input-list ranks (1-based; `None` where
/// the document did not appear in that list).
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub id: String,
    pub score: f32,
    pub ranks: Vec<Option<usize>>,
}

/// Weighted reciprocal rank fusion over N ranked lists.
///
/// Each list contributes `weight / (k + rank)` for every document it holds.
/// Output is sorted by fused score descending with deterministic tie-breaks
/// (first list's rank ascending, then id), so identical inputs always
/// produce byte-identical orderings.
pub fn reciprocal_rank_fusion(lists: &[(&[(String, f32)], f32)], k: usize) -> Vec<FusedHit> {
    let mut fused: HashMap<String, FusedHit> = HashMap::new();

    for (list_index, (list, weight)) in lists.iter().enumerate() {
        for (i, (id, _score)) in list.iter().enumerate() {
            let rank = i + 1;
            let entry = fused.entry(id.clone()).or_insert_with(|| FusedHit {
                id: id.clone(),
                score: 0.0,
                ranks: vec![None; lists.len()],
            });
            if entry.ranks[list_index].is_none() {
                entry.ranks[list_index] = Some(rank);
                entry.score += weight / (k + rank) as f32;
            }
        }
    }

    let mut out: Vec<FusedHit> = fused.into_values().collect();
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| rank_or_last(a.ranks.first()).cmp(&rank_or_last(b.ranks.first())))
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

fn rank_or_last(rank: Option<&Option<usize>>) -> usize {
    rank.copied().flatten().unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[&str]) -> Vec<(String, f32)> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), 10.0 - i as f32))
            .collect()
    }

    #[test]
    fn documents_in_both_lists_rank_highest() {
        let a = list(&["x", "y"]);
        let b = list(&["y", "z"]);
        let fused = reciprocal_rank_fusion(&[(a.as_slice(), 0.5), (b.as_slice(), 0.5)], 60);
        assert_eq!(fused[0].id, "y");
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].ranks, vec![Some(2), Some(1)]);
    }

    #[test]
    fn weights_scale_each_lists_contribution() {
        let a = list(&["a"]);
        let b = list(&["b"]);
        let fused = reciprocal_rank_fusion(&[(a.as_slice(), 0.9), (b.as_slice(), 0.1)], 60);
        assert_eq!(fused[0].id, "a");
        let expected = 0.9 / 61.0;
        assert!((fused[0].score - expected).abs() < 1e-6);
    }

    #[test]
    fn absent_documents_contribute_nothing() {
        let a = list(&["a", "b"]);
        let empty: Vec<(String, f32)> = Vec::new();
        let fused = reciprocal_rank_fusion(&[(a.as_slice(), 1.0), (empty.as_slice(), 1.0)], 60);
        let b_hit = fused.iter().find(|f| f.id == "b").expect("b fused");
        assert_eq!(b_hit.ranks[1], None);
        assert!((b_hit.score - 1.0 / 62.0).abs() < 1e-6);
    }

    #[test]
    fn output_is_deterministic_for_identical_input() {
        let a = list(&["m", "n", "o"]);
        let b = list(&["o", "n", "m"]);
        let first = reciprocal_rank_fusion(&[(a.as_slice(), 0.5), (b.as_slice(), 0.5)], 60);
        for _ in 0..10 {
            let again = reciprocal_rank_fusion(&[(a.as_slice(), 0.5), (b.as_slice(), 0.5)], 60);
            let ids: Vec<&str> = again.iter().map(|f| f.id.as_str()).collect();
            let first_ids: Vec<&str> = first.iter().map(|f| f.id.as_str()).collect();
            assert_eq!(ids, first_ids);
        }
    }

    #[test]
    fn ties_break_by_first_list_rank_then_id() {
        // Two documents each appearing once at the same rank in different
        // lists of equal weight fuse to the same score.
        let a = list(&["p"]);
        let b = list(&["q"]);
        let fused = reciprocal_rank_fusion(&[(a.as_slice(), 0.5), (b.as_slice(), 0.5)], 60);
        assert_eq!(fused[0].id, "p");
        assert_eq!(fused[1].id, "q");
    }
}
