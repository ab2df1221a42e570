use crate::globals;
use crate::store::{StoreError, VoteStore};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use itertools::Itertools;
use rand::{Rng, RngCore};
use std::collections::BTreeMap;
use thiserror::Error;

/// Store failure during the randomized merge sweep. Each offending
/// branch is left outstanding; the other branches in the sweep proceed
/// and the failures are reported together at the end.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("store failures during merge sweep: {failures:?}")]
    Sweep { failures: Vec<(String, String)> },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a merge sweep did, per contest uid.
#[derive(Debug, Default)]
pub struct MergeSummary {
    pub merged: BTreeMap<String, usize>,
    pub outstanding: BTreeMap<String, usize>,
}

impl MergeSummary {
    pub fn merged_total(&self) -> usize {
        self.merged.values().sum()
    }
}

/// The opaque payload written over a contest file at merge time: 48
/// random bytes, base64 encoded. At merge time the mainline commit
/// contents become independent of which voter's branch was merged.
fn opaque_payload<R: RngCore>(rng: &mut R) -> String {
    let mut bytes = [0u8; 48];
    rng.fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Randomized, quantized merge of per-contest branches into the
/// mainline.
///
/// Branches are grouped by contest uid. A uid with `n` outstanding
/// branches keeps at least `minimum_cast_cache` of them un-merged
/// unless `flush` is set; the branches to merge are selected uniformly
/// at random without replacement, so mainline commit order does not
/// reveal branch creation order.
pub fn merge_contests<S: VoteStore, R: Rng>(
    store: &mut S,
    flush: bool,
    minimum_cast_cache: usize,
    rng: &mut R,
) -> Result<MergeSummary, MergeError> {
    store.pull()?;
    let prefix = format!("{}/", globals::CONTEST_FILE_SUBDIR);
    let branches = store.list_branches(&prefix)?;

    // Branch names are `{subdir}/{uid}/{nonce}`; sorted alphabetically
    // they group by uid.
    let mut batches: Vec<(String, Vec<String>)> = Vec::new();
    for (uid, group) in &branches
        .iter()
        .group_by(|branch| branch.split('/').nth(1).unwrap_or("").to_string())
    {
        batches.push((uid, group.cloned().collect()));
    }

    let mut summary = MergeSummary::default();
    let mut failures: Vec<(String, String)> = Vec::new();
    for (uid, mut batch) in batches {
        let count = if batch.len() <= minimum_cast_cache {
            if flush {
                batch.len()
            } else {
                crate::log_debug!(
                    "contest {} not merged - only {} available",
                    uid,
                    batch.len()
                );
                summary.outstanding.insert(uid.clone(), batch.len());
                continue;
            }
        } else if flush {
            batch.len()
        } else {
            batch.len() - minimum_cast_cache
        };

        let mut merged = 0;
        for _ in 0..count {
            let pick = rng.gen_range(0..batch.len());
            let branch = batch.remove(pick);
            match merge_one(store, &branch, rng) {
                Ok(()) => merged += 1,
                Err(err) => {
                    crate::log_error!("leaving {} outstanding: {}", branch, err);
                    let _ = store.abort_merge();
                    failures.push((branch, err.to_string()));
                }
            }
        }
        crate::log_info!("merged {} contest {} branches", merged, uid);
        summary.merged.insert(uid.clone(), merged);
        summary
            .outstanding
            .insert(uid, batch.len() + count - merged);
    }

    if failures.is_empty() {
        Ok(summary)
    } else {
        Err(MergeError::Sweep { failures })
    }
}

/// Merge a single branch to the mainline and delete it, locally and on
/// the remote store.
fn merge_one<S: VoteStore, R: Rng>(
    store: &mut S,
    branch: &str,
    rng: &mut R,
) -> Result<(), StoreError> {
    let file = store.branch_file(branch)?;
    store.merge_no_ff(branch)?;
    store.commit_merge(
        &file,
        &opaque_payload(rng),
        &format!("Merge branch '{}'", branch),
    )?;
    store.push_mainline()?;
    store.delete_branch(branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn cast_branches(store: &mut MemoryStore, uid: &str, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                let branch = format!("CVRs/{}/nonce-{:02}", uid, i);
                store.create_branch(&branch).unwrap();
                store
                    .stage_and_commit(
                        &branch,
                        &format!("CVRs/{}/cvr.json", uid),
                        &format!("{{\"ballot\": {}}}", i),
                        "contest",
                    )
                    .unwrap();
                store.push_branch(&branch).unwrap();
                branch
            })
            .collect()
    }

    #[test]
    fn test_anonymity_guard_is_a_noop() {
        let mut store = MemoryStore::new();
        cast_branches(&mut store, "0000", 5);
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let summary = merge_contests(&mut store, false, 100, &mut rng).unwrap();
        assert_eq!(summary.merged_total(), 0);
        assert_eq!(summary.outstanding.get("0000"), Some(&5));
        assert_eq!(store.list_branches("CVRs/").unwrap().len(), 5);
        assert!(store.mainline_merges().is_empty());
    }

    #[test]
    fn test_flush_merges_everything_in_random_order() {
        let mut store = MemoryStore::new();
        let branches = cast_branches(&mut store, "0000", 12);
        let creation_tips: Vec<String> = branches
            .iter()
            .map(|b| store.branch_tip(b).unwrap())
            .collect();

        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let summary = merge_contests(&mut store, true, 100, &mut rng).unwrap();
        assert_eq!(summary.merged_total(), 12);
        assert!(store.list_branches("CVRs/").unwrap().is_empty());

        // The mainline gained one merge commit per branch, and the merge
        // order is not the branch creation order.
        let mut merged_tips = store.merged_branch_tips();
        merged_tips.reverse(); // oldest first
        assert_eq!(merged_tips.len(), 12);
        let mut sorted_a = merged_tips.clone();
        let mut sorted_b = creation_tips.clone();
        sorted_a.sort();
        sorted_b.sort();
        assert_eq!(sorted_a, sorted_b);
        assert_ne!(merged_tips, creation_tips);
    }

    #[test]
    fn test_overflow_above_the_cache_floor_is_merged() {
        let mut store = MemoryStore::new();
        cast_branches(&mut store, "0000", 7);
        cast_branches(&mut store, "0001", 3);
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let summary = merge_contests(&mut store, false, 4, &mut rng).unwrap();
        // 0000 had 7 > 4: merge down to the floor. 0001 had 3 <= 4: skip.
        assert_eq!(summary.merged.get("0000"), Some(&3));
        assert_eq!(summary.merged.get("0001"), None);
        assert_eq!(store.list_branches("CVRs/0000/").unwrap().len(), 4);
        assert_eq!(store.list_branches("CVRs/0001/").unwrap().len(), 3);
        // Merged mainline files are opaque base64, not contest JSON.
        let tip = store.mainline_tip().to_string();
        let payload = store.show(&tip).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&payload).is_err());
        assert_eq!(payload.len(), 64);
    }
}
