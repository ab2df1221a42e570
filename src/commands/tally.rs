use crate::config::ElectionConfig;
use crate::model::contest::Contest;
use crate::store::VoteStore;
use crate::tally::{CastVoteRecord, Tally};
use std::collections::BTreeMap;
use std::error::Error;

/// Extract the CVR batches from the mainline and tally each contest.
/// `contest_uid` narrows the run to one contest; `checks` digests get
/// their accounting traced at every step.
pub fn tally<S: VoteStore>(
    store: &mut S,
    config: &ElectionConfig,
    contest_uid: Option<&str>,
    checks: &[String],
) -> Result<(), Box<dyn Error>> {
    store.pull()?;
    let batches = contest_batches(store)?;
    if batches.is_empty() {
        println!("No cast contests found on the mainline");
        return Ok(());
    }

    for (uid, mut batch) in batches {
        if let Some(only) = contest_uid {
            if uid != only {
                continue;
            }
        }
        let name = config
            .uid_pp_name(&uid)
            .unwrap_or_else(|| uid.clone());
        crate::log_contest!(&name, batch[0].contest.tally.as_str());
        println!("Contest {} ({} votes cast)", name, batch.len());
        let mut contest_tally = match Tally::new(&batch[0]) {
            Ok(contest_tally) => contest_tally,
            Err(err) => {
                crate::log_error!("cannot tally contest {}: {}", uid, err);
                continue;
            }
        };
        // A tally failure is fatal for this contest only.
        if let Err(err) = contest_tally.tallyho(&mut batch, checks, None) {
            crate::log_error!("contest {} tally failed: {}", uid, err);
        }
    }
    Ok(())
}

/// Group every mainline CVR by contest uid, in uid order.
pub fn contest_batches<S: VoteStore>(
    store: &S,
) -> Result<BTreeMap<String, Vec<CastVoteRecord>>, Box<dyn Error>> {
    let mut batches: BTreeMap<String, Vec<CastVoteRecord>> = BTreeMap::new();
    for commit in store.cvr_commits()? {
        let contest: Contest = serde_json::from_str(&commit.payload).map_err(|err| {
            format!("CVR commit {} does not parse: {}", commit.digest, err)
        })?;
        let uid = contest
            .uid
            .clone()
            .ok_or_else(|| format!("CVR commit {} carries no uid", commit.digest))?;
        batches.entry(uid).or_default().push(CastVoteRecord {
            digest: commit.digest,
            contest,
        });
    }
    Ok(batches)
}
