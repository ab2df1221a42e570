use crate::accept::accept_ballot;
use crate::commands::{merge, tally};
use crate::config::ElectionConfig;
use crate::model::address::Address;
use crate::model::ballot::Ballot;
use crate::receipt::{build_versioned_receipt, render_versioned_receipt};
use crate::store::VoteStore;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::error::Error;
use std::str::FromStr;

/// Which half of a mock election this process simulates. A scanner
/// casts and accepts ballots; a tabulator merges and tallies; `both`
/// runs the whole loop serially in one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Scanner,
    Tabulator,
    Both,
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Device, String> {
        match s {
            "scanner" => Ok(Device::Scanner),
            "tabulator" => Ok(Device::Tabulator),
            "both" => Ok(Device::Both),
            other => Err(format!("an illegal value was supplied for device ({})", other)),
        }
    }
}

/// Run a serial synchronous mock election loop against one address's
/// ballot. Flush mode 0 leaves the anonymity guard in place each
/// iteration, 1 flushes once at the end, 2 flushes every iteration.
pub fn mock_election<S: VoteStore>(
    store: &mut S,
    config: &ElectionConfig,
    mut address: Address,
    device: Device,
    iterations: usize,
    flush_mode: u8,
    minimum_cast_cache: usize,
    version_receipts: bool,
) -> Result<(), Box<dyn Error>> {
    address.map_ggos(config)?;
    let blank = Ballot::blank(&address, config);

    match device {
        Device::Scanner | Device::Both => {
            for count in 1..=iterations {
                crate::log_info!("Iteration {} of {}", count, iterations);
                store.pull()?;
                let mut ballot = blank.clone();
                demo_cast(&mut ballot);
                let receipt = accept_ballot(store, &mut ballot, &mut OsRng)?;
                if version_receipts {
                    let versioned = build_versioned_receipt(store, &receipt, &mut OsRng)?;
                    crate::log_info!("{}", render_versioned_receipt(&versioned));
                }
                if device == Device::Both {
                    if flush_mode == 2 {
                        merge(store, true, minimum_cast_cache)?;
                    } else {
                        merge(store, false, minimum_cast_cache)?;
                    }
                    // Don't let too much garbage build up.
                    if count % 10 == 9 {
                        store.gc()?;
                    }
                }
            }
            if device == Device::Both {
                merge(store, true, minimum_cast_cache)?;
                tally(store, config, None, &[])?;
            }
            store.gc()?;
        }
        Device::Tabulator => {
            // The scanners push to the shared store; this side polls,
            // merges, and finally tallies.
            for count in 1..=iterations {
                store.pull()?;
                if flush_mode == 2 {
                    merge(store, true, minimum_cast_cache)?;
                    tally(store, config, None, &[])?;
                    return Ok(());
                }
                merge(store, false, minimum_cast_cache)?;
                if count < iterations {
                    crate::log_info!("Sleeping for 10 (iteration={})", count);
                    std::thread::sleep(std::time::Duration::from_secs(10));
                }
            }
            if flush_mode == 1 {
                println!("Cleaning up remaining unmerged ballots");
                merge(store, true, minimum_cast_cache)?;
            }
            tally(store, config, None, &[])?;
        }
    }
    Ok(())
}

/// Fill a blank ballot with random selections, the way a demo voter
/// would.
fn demo_cast(ballot: &mut Ballot) {
    for contest in &mut ballot.contests {
        let mut names = contest.choice_names();
        names.shuffle(&mut OsRng);
        let picks = OsRng.gen_range(1..=contest.effective_max_selections());
        for name in names.into_iter().take(picks) {
            contest
                .add_selection_name(&name)
                .expect("shuffled unique choice names always select cleanly");
        }
    }
}
