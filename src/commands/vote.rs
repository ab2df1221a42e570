use crate::accept::accept_ballot;
use crate::config::ElectionConfig;
use crate::model::address::Address;
use crate::model::ballot::Ballot;
use crate::receipt::{build_versioned_receipt, render_receipt, render_versioned_receipt};
use crate::store::VoteStore;
use rand::rngs::OsRng;
use std::error::Error;

/// Cast and accept one ballot: resolve the address, produce the blank
/// ballot, apply the voter's selections, fan the contests onto
/// anonymous branches, and print the receipt.
///
/// Selections are `uid=name` pairs; their order is the rank for RCV
/// contests.
pub fn vote<S: VoteStore>(
    store: &mut S,
    config: &ElectionConfig,
    mut address: Address,
    selections: &[String],
    version_receipts: bool,
) -> Result<(), Box<dyn Error>> {
    address.map_ggos(config)?;
    store.pull()?;
    let mut ballot = Ballot::blank(&address, config);

    for selection in selections {
        let (uid, name) = selection
            .split_once('=')
            .ok_or_else(|| format!("selections must be uid=name pairs ({})", selection))?;
        let contest = ballot
            .contests
            .iter_mut()
            .find(|contest| contest.uid.as_deref() == Some(uid))
            .ok_or_else(|| format!("this ballot has no contest with uid ({})", uid))?;
        contest.add_selection_name(name)?;
    }

    let receipt = accept_ballot(store, &mut ballot, &mut OsRng)?;
    if version_receipts {
        let versioned = build_versioned_receipt(store, &receipt, &mut OsRng)?;
        println!("{}", render_versioned_receipt(&versioned));
        println!("Your row is {}", versioned.voter_row + 1);
    } else {
        println!("{}", render_receipt(&receipt));
    }
    Ok(())
}
