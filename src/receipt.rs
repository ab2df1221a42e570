use crate::accept::BallotReceipt;
use crate::globals;
use crate::store::{StoreError, VoteStore};
use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;

/// A versioned ballot receipt: one column per contest, `rows.len()` rows
/// of digests per column. The voter's own digests all sit on
/// `voter_row`; every other cell is a randomly selected peer digest from
/// the outstanding-branch pool, so the receipt reveals one-in-N
/// membership, never identity.
#[derive(Debug, Clone)]
pub struct VersionedReceipt {
    pub uids: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub voter_row: usize,
}

/// Build the versioned receipt for a just-accepted ballot.
///
/// Row count is `globals::BALLOT_RECEIPT_ROWS` when every contest has
/// that many outstanding branches, otherwise the smallest pool size.
pub fn build_versioned_receipt<S: VoteStore, R: Rng>(
    store: &mut S,
    receipt: &BallotReceipt,
    rng: &mut R,
) -> Result<VersionedReceipt, StoreError> {
    let mut pools: Vec<Vec<String>> = Vec::new();
    for entry in &receipt.entries {
        let prefix = format!("{}/{}/", globals::CONTEST_FILE_SUBDIR, entry.uid);
        let mut pool = Vec::new();
        for branch in store.list_branches(&prefix)? {
            let tip = store.branch_tip(&branch)?;
            if tip != entry.digest {
                pool.push(tip);
            }
        }
        pool.sort();
        pool.dedup();
        pools.push(pool);
    }

    let row_count = pools
        .iter()
        .map(|pool| pool.len() + 1)
        .min()
        .unwrap_or(1)
        .min(globals::BALLOT_RECEIPT_ROWS);
    let voter_row = rng.gen_range(0..row_count);

    let mut rows = vec![Vec::with_capacity(receipt.entries.len()); row_count];
    for (entry, pool) in receipt.entries.iter().zip(pools.iter_mut()) {
        pool.shuffle(rng);
        let mut column: Vec<String> = pool.iter().take(row_count - 1).cloned().collect();
        column.insert(voter_row, entry.digest.clone());
        for (row, digest) in rows.iter_mut().zip(column) {
            row.push(digest);
        }
    }

    Ok(VersionedReceipt {
        uids: receipt
            .entries
            .iter()
            .map(|entry| entry.uid.clone())
            .collect(),
        rows,
        voter_row,
    })
}

/// Render the plain receipt: one `uid: digest` line per contest, in
/// contest order.
pub fn render_receipt(receipt: &BallotReceipt) -> String {
    receipt
        .entries
        .iter()
        .map(|entry| format!("{}: {}", entry.uid, entry.digest))
        .join("\n")
}

/// Render the versioned receipt as a digest table, one row per line.
/// The voter's row index is not part of the rendering; it is told to the
/// voter out of band.
pub fn render_versioned_receipt(receipt: &VersionedReceipt) -> String {
    let mut lines = Vec::with_capacity(receipt.rows.len() + 1);
    lines.push(receipt.uids.join(","));
    for row in &receipt.rows {
        lines.push(row.join(","));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accept::ReceiptEntry;
    use crate::store::{MemoryStore, VoteStore};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    /// Cast `count` synthetic contests for `uid`, returning their digests.
    fn cast_peers(store: &mut MemoryStore, uid: &str, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                let branch = format!("CVRs/{}/nonce-{}", uid, i);
                store.create_branch(&branch).unwrap();
                let digest = store
                    .stage_and_commit(
                        &branch,
                        &format!("CVRs/{}/cvr.json", uid),
                        &format!("{{\"ballot\": {}}}", i),
                        "contest",
                    )
                    .unwrap();
                store.push_branch(&branch).unwrap();
                digest
            })
            .collect()
    }

    #[test]
    fn test_versioned_receipt_hides_the_voter() {
        let mut store = MemoryStore::new();
        let digests = cast_peers(&mut store, "0000", 12);
        let voter_digest = digests[3].clone();
        let receipt = BallotReceipt {
            entries: vec![ReceiptEntry {
                uid: "0000".to_string(),
                digest: voter_digest.clone(),
            }],
        };

        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let versioned = build_versioned_receipt(&mut store, &receipt, &mut rng).unwrap();
        assert_eq!(versioned.uids, vec!["0000"]);
        assert_eq!(versioned.rows.len(), 12);
        assert_eq!(versioned.rows[versioned.voter_row][0], voter_digest);
        // Every row entry is a real outstanding digest and no digest
        // appears twice.
        let mut seen = std::collections::BTreeSet::new();
        for row in &versioned.rows {
            assert!(digests.contains(&row[0]));
            assert!(seen.insert(row[0].clone()));
        }
    }

    #[test]
    fn test_row_count_is_capped_by_smallest_pool() {
        let mut store = MemoryStore::new();
        let big = cast_peers(&mut store, "0000", 9);
        let small = cast_peers(&mut store, "0001", 3);
        let receipt = BallotReceipt {
            entries: vec![
                ReceiptEntry {
                    uid: "0000".to_string(),
                    digest: big[0].clone(),
                },
                ReceiptEntry {
                    uid: "0001".to_string(),
                    digest: small[0].clone(),
                },
            ],
        };
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let versioned = build_versioned_receipt(&mut store, &receipt, &mut rng).unwrap();
        assert_eq!(versioned.rows.len(), 3);
        for row in &versioned.rows {
            assert_eq!(row.len(), 2);
        }
        let rendered = render_versioned_receipt(&versioned);
        assert_eq!(rendered.lines().count(), 4);
        assert!(rendered.starts_with("0000,0001"));
    }
}
