use crate::model::contest::Contest;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Accumulate one ballot into the pairwise matrix. `a` beats `b` on a
/// ballot when `a` is ranked and `b` is not, or both are ranked and `a`
/// ranks higher. Unranked pairs contribute nothing.
pub(super) fn tally_a_pwc_contest(
    reference: &Contest,
    pairwise_matrix: &mut BTreeMap<(String, String), u64>,
    contest: &Contest,
    provenance: bool,
    vote_count: u64,
    digest: &str,
) {
    let ranking = &contest.selection;
    if ranking.is_empty() {
        if provenance {
            println!("No vote {}: BLANK", digest);
        }
        return;
    }

    let rank_index: HashMap<&str, usize> = ranking
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), index))
        .collect();
    if provenance {
        println!(
            "Pairwise ranking for ballot vote {} ({}): {:?}",
            vote_count, digest, ranking
        );
    }

    let choices = reference.choice_names();
    for a in &choices {
        for b in &choices {
            if a == b {
                continue;
            }
            let a_rank = rank_index.get(a.as_str());
            let b_rank = rank_index.get(b.as_str());
            let a_preferred = match (a_rank, b_rank) {
                (Some(_), None) => true,
                (Some(a_rank), Some(b_rank)) => a_rank < b_rank,
                _ => false,
            };
            if a_preferred {
                if let Some(count) = pairwise_matrix.get_mut(&(a.clone(), b.clone())) {
                    *count += 1;
                    if provenance {
                        println!(
                            "Pairwise vote {} ({}) for ({}, {})",
                            count, digest, a, b
                        );
                    }
                }
            }
        }
    }
}

/// Build the ranked-pairs DAG and emit the winners.
///
/// Pairwise victories are inserted in order of descending margin (then
/// descending winning count); an edge that would close a cycle is
/// rejected. The topological order of the surviving DAG ranks the
/// candidates; the first `open_positions` are the winners. Each edge
/// accept/reject is logged.
pub(super) fn determine_condorcet_winners(
    reference: &Contest,
    pairwise_matrix: &BTreeMap<(String, String), u64>,
) -> Vec<String> {
    let choices = reference.choice_names();

    let mut pairwise_results: Vec<(String, String, u64, u64, u64)> = Vec::new();
    for a in &choices {
        for b in &choices {
            if a == b {
                continue;
            }
            let ab = pairwise_matrix
                .get(&(a.clone(), b.clone()))
                .copied()
                .unwrap_or(0);
            let ba = pairwise_matrix
                .get(&(b.clone(), a.clone()))
                .copied()
                .unwrap_or(0);
            if ab > ba {
                pairwise_results.push((a.clone(), b.clone(), ab - ba, ab, ba));
            }
        }
    }
    // Sort by margin descending, then by winning count descending; the
    // sort is stable so equal pairs keep choice order.
    pairwise_results.sort_by(|x, y| (y.2, y.3).cmp(&(x.2, x.3)));

    let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (a, b, margin, ab, ba) in &pairwise_results {
        if reaches(&edges, b, a) {
            println!(
                "Skipping edge {} -> {} (margin={}, {}-{}) to avoid cycle",
                a, b, margin, ab, ba
            );
        } else {
            edges.entry(a.clone()).or_default().push(b.clone());
            println!("Adding edge {} -> {} (margin={}, {}-{})", a, b, margin, ab, ba);
        }
    }

    let topo_order = topological_sort(&choices, &edges);
    println!("Condorcet topological order: {}", topo_order.join(", "));
    let seats = reference.open_positions as usize;
    let winners: Vec<String> = topo_order.into_iter().take(seats).collect();
    println!("Condorcet winner(s): {:?}", winners);
    winners
}

/// Whether `to` is reachable from `from` by following edges. Iterative
/// DFS with an explicit visited set; safe on any graph shape.
fn reaches(edges: &BTreeMap<String, Vec<String>>, from: &str, to: &str) -> bool {
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut stack: Vec<&str> = vec![from];
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(nexts) = edges.get(node) {
            stack.extend(nexts.iter().map(|next| next.as_str()));
        }
    }
    false
}

/// Kahn's algorithm over the full candidate set; among ready nodes the
/// smallest name goes first, so the order is deterministic.
fn topological_sort(choices: &[String], edges: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut in_degree: BTreeMap<&str, usize> =
        choices.iter().map(|name| (name.as_str(), 0)).collect();
    for nexts in edges.values() {
        for next in nexts {
            if let Some(degree) = in_degree.get_mut(next.as_str()) {
                *degree += 1;
            }
        }
    }
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::new();
    while let Some(node) = ready.iter().next().copied() {
        ready.remove(node);
        order.push(node.to_string());
        if let Some(nexts) = edges.get(node) {
            for next in nexts {
                let degree = in_degree
                    .get_mut(next.as_str())
                    .expect("edges only reference known choices");
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(next.as_str());
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::{CastVoteRecord, Tally};

    fn pwc_contest(choices: &[&str]) -> Contest {
        let mut contest: Contest = serde_json::from_value(serde_json::json!({
            "choices": choices,
            "tally": "pwc",
            "open_positions": 1,
            "contest_type": "candidate",
            "contest_name": "pwc contest",
            "ggo": ".",
            "uid": "0000"
        }))
        .unwrap();
        contest.apply_defaults();
        contest
    }

    fn run_pwc(choices: &[&str], ballots: &[&[&str]]) -> Tally {
        let reference = pwc_contest(choices);
        let mut cvrs: Vec<CastVoteRecord> = ballots
            .iter()
            .enumerate()
            .map(|(i, selection)| {
                let mut contest = reference.clone();
                contest.selection = selection.iter().map(|s| s.to_string()).collect();
                CastVoteRecord {
                    digest: format!("digest-{:04}", i),
                    contest,
                }
            })
            .collect();
        let mut tally = Tally::new(&cvrs[0]).unwrap();
        tally.tallyho(&mut cvrs, &[], None).unwrap();
        tally
    }

    #[test]
    fn test_condorcet_cycle_is_broken_by_insertion_order() {
        // A perfect three-way cycle: every margin is +1, the third edge
        // would close the loop and is rejected.
        let tally = run_pwc(
            &["A", "B", "C"],
            &[&["A", "B", "C"], &["B", "C", "A"], &["C", "A", "B"]],
        );
        assert_eq!(tally.winners, vec!["A"]);
        assert_eq!(
            tally.pairwise_matrix.get(&("A".to_string(), "B".to_string())),
            Some(&2)
        );
        assert_eq!(
            tally.pairwise_matrix.get(&("B".to_string(), "A".to_string())),
            Some(&1)
        );
    }

    #[test]
    fn test_condorcet_winner_beats_everyone() {
        let tally = run_pwc(
            &["A", "B", "C"],
            &[&["B", "A", "C"], &["B", "C", "A"], &["A", "B", "C"]],
        );
        assert_eq!(tally.winners, vec!["B"]);
    }

    #[test]
    fn test_unranked_choices_count_below_ranked() {
        // A ballot ranking only A prefers A over both B and C.
        let tally = run_pwc(&["A", "B", "C"], &[&["A"], &["A"], &["B", "A"]]);
        assert_eq!(tally.winners, vec!["A"]);
    }

    #[test]
    fn test_graph_stays_acyclic_through_every_insertion() {
        let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let inserts = [("A", "B"), ("B", "C"), ("C", "A"), ("C", "D"), ("D", "A")];
        for (a, b) in &inserts {
            if !reaches(&edges, b, a) {
                edges
                    .entry(a.to_string())
                    .or_default()
                    .push(b.to_string());
            }
            // No node may reach itself at any step.
            for node in ["A", "B", "C", "D"] {
                let nexts: Vec<String> = edges.get(node).cloned().unwrap_or_default();
                for next in nexts {
                    assert!(
                        !reaches(&edges, &next, node),
                        "cycle through {} after inserting {:?}",
                        node,
                        (a, b)
                    );
                }
            }
        }
        assert_eq!(edges["A"], vec!["B"]);
        assert_eq!(edges["B"], vec!["C"]);
        assert_eq!(edges["C"], vec!["D"]);
        assert!(!edges.contains_key("D"));
    }
}
