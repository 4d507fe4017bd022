//! # Maximum Spanning Arborescence Decoding
//!
//! Implements the Chu-Liu/Edmonds algorithm for converting a per-word
//! head-score matrix into a valid dependency tree rooted at the virtual
//! root (index 0).
//!
//! Scores are processed in `f64`: the matrices produced by the scoring
//! model are near-uniform after softmax, and single-precision ties can
//! corrupt cycle detection.

use crate::error::{KizunaError, Result};

/// Decoder for maximum-weight spanning arborescences.
///
/// Entry `[d][h]` of the input matrix is the score of attaching dependent
/// `d` to head `h`. Row 0 belongs to the virtual root and is never read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChuLiuEdmonds;

impl ChuLiuEdmonds {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self
    }

    /// Decode the maximum spanning arborescence for one sentence.
    ///
    /// # Arguments
    /// * `scores` - Square `(N+1) x (N+1)` matrix including the root position
    ///
    /// # Returns
    /// One head index per non-root word, in order (length `N`). The result
    /// is always a tree: no word is its own head, and following head
    /// pointers from any word reaches the root.
    pub fn decode(&self, scores: &[Vec<f64>]) -> Result<Vec<usize>> {
        let n = scores.len();
        let cols = scores.first().map(Vec::len).unwrap_or(0);
        if n < 2 {
            return Err(KizunaError::ShapeMismatch { rows: n, cols });
        }
        for row in scores {
            if row.len() != n {
                return Err(KizunaError::ShapeMismatch {
                    rows: n,
                    cols: row.len(),
                });
            }
        }

        let heads = solve(scores);
        Ok(heads[1..].to_vec())
    }
}

/// Recursive Chu-Liu/Edmonds on a dense matrix. Returns a full head vector
/// with `heads[0] == 0` as a placeholder for the root.
fn solve(scores: &[Vec<f64>]) -> Vec<usize> {
    let n = scores.len();

    // Greedy step: highest-scoring incoming edge per non-root node.
    let mut best = vec![0usize; n];
    for v in 1..n {
        let mut best_head = 0;
        let mut best_score = f64::NEG_INFINITY;
        for u in 0..n {
            if u != v && scores[v][u] > best_score {
                best_score = scores[v][u];
                best_head = u;
            }
        }
        best[v] = best_head;
    }

    match find_cycle(&best) {
        None => best,
        Some(cycle) => contract(scores, &best, &cycle),
    }
}

/// Find a cycle in the greedy head selection, if any. The root cannot be
/// part of a cycle since it has no head pointer.
fn find_cycle(best: &[usize]) -> Option<Vec<usize>> {
    let n = best.len();
    // 0 = unvisited, 1 = on current path, 2 = finished
    let mut color = vec![0u8; n];
    color[0] = 2;

    for start in 1..n {
        if color[start] != 0 {
            continue;
        }
        let mut path = Vec::new();
        let mut v = start;
        while color[v] == 0 {
            color[v] = 1;
            path.push(v);
            v = best[v];
        }
        if color[v] == 1 {
            let pos = path.iter().position(|&x| x == v).unwrap_or(0);
            return Some(path[pos..].to_vec());
        }
        for p in path {
            color[p] = 2;
        }
    }
    None
}

/// Contract a cycle into a single node, solve the reduced problem, and
/// expand the solution back, replacing exactly one cycle edge with the
/// edge entering the cycle from outside.
fn contract(scores: &[Vec<f64>], best: &[usize], cycle: &[usize]) -> Vec<usize> {
    let n = scores.len();
    let mut in_cycle = vec![false; n];
    for &w in cycle {
        in_cycle[w] = true;
    }

    // Outside nodes keep their relative order; the contracted node is last.
    let mut old_of = Vec::with_capacity(n - cycle.len());
    let mut new_of = vec![usize::MAX; n];
    for v in 0..n {
        if !in_cycle[v] {
            new_of[v] = old_of.len();
            old_of.push(v);
        }
    }
    let contracted = old_of.len();
    let m = contracted + 1;

    let mut sub = vec![vec![f64::NEG_INFINITY; m]; m];

    // Edges between outside nodes carry over unchanged.
    for v in 0..n {
        if in_cycle[v] {
            continue;
        }
        for u in 0..n {
            if !in_cycle[u] && u != v {
                sub[new_of[v]][new_of[u]] = scores[v][u];
            }
        }
    }

    // Edges entering the cycle use the adjusted-weight rule: the external
    // edge gains what the replaced internal edge loses.
    let mut entry_of = vec![usize::MAX; m];
    for u in 0..n {
        if in_cycle[u] {
            continue;
        }
        let mut best_adj = f64::NEG_INFINITY;
        let mut best_entry = cycle[0];
        for &w in cycle {
            let adjusted = scores[w][u] - scores[w][best[w]];
            if adjusted > best_adj {
                best_adj = adjusted;
                best_entry = w;
            }
        }
        sub[contracted][new_of[u]] = best_adj;
        entry_of[new_of[u]] = best_entry;
    }

    // Edges leaving the cycle take the best internal source.
    let mut exit_of = vec![usize::MAX; n];
    for v in 1..n {
        if in_cycle[v] {
            continue;
        }
        let mut best_score = f64::NEG_INFINITY;
        let mut best_exit = cycle[0];
        for &w in cycle {
            if scores[v][w] > best_score {
                best_score = scores[v][w];
                best_exit = w;
            }
        }
        sub[new_of[v]][contracted] = best_score;
        exit_of[v] = best_exit;
    }

    let sub_heads = solve(&sub);

    // Expansion: cycle nodes keep their greedy heads except for the one
    // entered from outside.
    let mut heads = vec![0usize; n];
    for &w in cycle {
        heads[w] = best[w];
    }
    for v in 1..n {
        if in_cycle[v] {
            continue;
        }
        let h = sub_heads[new_of[v]];
        heads[v] = if h == contracted {
            exit_of[v]
        } else {
            old_of[h]
        };
    }
    let outer_head = sub_heads[contracted];
    heads[entry_of[outer_head]] = old_of[outer_head];

    heads
}
