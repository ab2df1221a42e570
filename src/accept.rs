use crate::globals;
use crate::model::ballot::Ballot;
use crate::store::{StoreError, VoteStore};
use crate::util::to_canonical_json;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use thiserror::Error;

/// Store failure while casting a ballot. Fatal for the whole ballot: the
/// voter receives no partial receipt. Branches created before the
/// failure keep their `{CONTEST_FILE_SUBDIR}/{uid}/{nonce}` names so a
/// later janitor can identify and delete them; the committed objects are
/// unreachable from the mainline and may be left behind.
#[derive(Error, Debug)]
pub enum AcceptError {
    #[error("ballot is not valid to accept: {0:?}")]
    InvalidBallot(Vec<String>),
    #[error("contest ({uid}) carries no uid; was the ballot generated from a loaded config?")]
    UnstampedContest { uid: String },
    #[error("store failure while accepting contest ({uid}) on branch ({branch}): {source}")]
    Store {
        uid: String,
        branch: String,
        source: StoreError,
    },
}

/// One row of a ballot receipt: the contest uid and the digest of its
/// accepted CVR commit.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptEntry {
    pub uid: String,
    pub digest: String,
}

/// The ordered per-contest digests returned to the voter at acceptance.
#[derive(Debug, Clone)]
pub struct BallotReceipt {
    pub entries: Vec<ReceiptEntry>,
}

/// A fresh branch-disambiguating nonce: 256 bits of cryptographic
/// randomness, base64 encoded (URL-safe alphabet, so it is a valid ref
/// name component).
pub fn branch_nonce<R: RngCore>(rng: &mut R) -> String {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The on-store path of a contest's CVR file.
pub fn cvr_file(uid: &str) -> String {
    format!("{}/{}/cvr.json", globals::CONTEST_FILE_SUBDIR, uid)
}

/// Accept a fully-populated cast ballot: fan each contest out onto its
/// own anonymous branch, push, and collect the ordered (uid, digest)
/// receipt.
///
/// The serialized CVR deliberately omits `cast_branch`: the commit
/// digest is then a function of the contest content and the mainline
/// parent only, so identical ballots cast against identical store state
/// produce identical receipts.
pub fn accept_ballot<S: VoteStore, R: RngCore>(
    store: &mut S,
    ballot: &mut Ballot,
    rng: &mut R,
) -> Result<BallotReceipt, AcceptError> {
    let problems = ballot.problems();
    if !problems.is_empty() {
        return Err(AcceptError::InvalidBallot(problems));
    }

    let mut entries = Vec::new();
    for contest in &mut ballot.contests {
        let uid = contest
            .uid
            .clone()
            .ok_or_else(|| AcceptError::UnstampedContest {
                uid: contest.contest_name.clone(),
            })?;
        let branch = format!(
            "{}/{}/{}",
            globals::CONTEST_FILE_SUBDIR,
            uid,
            branch_nonce(rng)
        );
        contest.cast_branch = Some(branch.clone());

        let mut cvr = contest.clone();
        cvr.cast_branch = None;
        let payload = to_canonical_json(&cvr).map_err(|err| AcceptError::Store {
            uid: uid.clone(),
            branch: branch.clone(),
            source: StoreError::Io(err.into()),
        })?;

        let digest = (|| -> Result<String, StoreError> {
            store.create_branch(&branch)?;
            let digest = store.stage_and_commit(
                &branch,
                &cvr_file(&uid),
                &payload,
                &format!("contest {}", uid),
            )?;
            store.push_branch(&branch)?;
            Ok(digest)
        })()
        .map_err(|source| AcceptError::Store {
            uid: uid.clone(),
            branch: branch.clone(),
            source,
        })?;

        crate::log_debug!("accepted contest {} on {} as {}", uid, branch, digest);
        entries.push(ReceiptEntry { uid, digest });
    }
    Ok(BallotReceipt { entries })
}
