use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracked_vote::commands::{merge, mock_election, show_contest, tally, vote, Device};
use tracked_vote::config::ElectionConfig;
use tracked_vote::model::address::{Address, AddressFields, ResolutionError};
use tracked_vote::store::GitStore;

#[derive(Parser)]
#[clap(about = "End-to-end verifiable voting over a commit graph store.")]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Args)]
struct StoreOpts {
    /// The election data working directory (the store checkout).
    #[clap(long, default_value = ".")]
    election_data: PathBuf,
    /// Per store-call timeout in seconds.
    #[clap(long)]
    timeout: Option<u64>,
}

impl StoreOpts {
    /// The live election checkout: either the given directory itself or
    /// its `ElectionData` subdirectory when the repo nests one.
    fn workdir(&self) -> PathBuf {
        let nested = self
            .election_data
            .join(tracked_vote::globals::ROOT_ELECTION_DATA_SUBDIR);
        if nested.is_dir() {
            nested
        } else {
            self.election_data.clone()
        }
    }

    fn store(&self) -> GitStore {
        GitStore::new(self.workdir(), self.timeout.map(Duration::from_secs))
    }

    fn config(&self) -> ElectionConfig {
        match ElectionConfig::load(&self.workdir()) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{}", err);
                std::process::exit(1);
            }
        }
    }
}

#[derive(Args)]
struct AddressOpts {
    /// The number and name of the street address (space separated).
    #[clap(short = 'a', long)]
    address: Option<String>,
    /// The substreet field of an address.
    #[clap(short = 'b', long)]
    substreet: Option<String>,
    /// The town field of an address.
    #[clap(short = 't', long)]
    town: Option<String>,
    /// The state/province field of an address.
    #[clap(short = 's', long)]
    state: Option<String>,
    /// A comma separated address: number, street, [substreet,] town, state.
    #[clap(long, conflicts_with_all = &["address", "substreet", "town", "state"])]
    csv: Option<String>,
}

impl AddressOpts {
    fn to_address(&self) -> Result<Address, ResolutionError> {
        if let Some(csv) = &self.csv {
            return Address::from_csv(csv);
        }
        let (number, street) = match &self.address {
            Some(address) => {
                let mut parts = address.splitn(2, char::is_whitespace);
                (
                    parts.next().unwrap_or("").to_string(),
                    parts.next().unwrap_or("").trim().to_string(),
                )
            }
            None => (String::new(), String::new()),
        };
        Address::new(
            AddressFields {
                number: Some(number),
                street: Some(street),
                substreet: self.substreet.clone(),
                town: self.town.clone(),
                state: self.state.clone(),
                ..AddressFields::default()
            },
            false,
        )
    }
}

#[derive(Subcommand)]
enum Command {
    /// Cast and accept a ballot, printing the receipt.
    Vote {
        #[clap(flatten)]
        store: StoreOpts,
        #[clap(flatten)]
        address: AddressOpts,
        /// A selection as uid=name; repeat in rank order for RCV.
        #[clap(long)]
        selection: Vec<String>,
        /// Pad the receipt with peer digests.
        #[clap(long)]
        version_receipts: bool,
    },
    /// Merge pending CVR branches into the mainline.
    Merge {
        #[clap(flatten)]
        store: StoreOpts,
        /// Merge everything, ignoring the anonymity-set floor.
        #[clap(long)]
        flush: bool,
        /// Minimum un-merged branches to keep outstanding per contest.
        #[clap(long, default_value = "100")]
        minimum_cast_cache: usize,
    },
    /// Tally the contests recorded on the mainline.
    Tally {
        #[clap(flatten)]
        store: StoreOpts,
        /// Only tally this contest uid.
        #[clap(long)]
        contest_uid: Option<String>,
        /// Comma separated CVR digests to trace through the count.
        #[clap(long)]
        track_contests: Option<String>,
    },
    /// Validate receipt digests and print their CVRs.
    ShowContest {
        #[clap(flatten)]
        store: StoreOpts,
        /// Comma separated (no spaces) list of contest digests.
        #[clap(long)]
        contest_check: String,
    },
    /// Run a serial mock election loop.
    MockElection {
        #[clap(flatten)]
        store: StoreOpts,
        #[clap(flatten)]
        address: AddressOpts,
        /// scanner, tabulator, or both.
        #[clap(long, default_value = "both")]
        device: Device,
        #[clap(long, default_value = "10")]
        iterations: usize,
        /// 0: keep the guard, 1: flush at the end, 2: flush every pass.
        #[clap(long, default_value = "0")]
        flush_mode: u8,
        #[clap(long, default_value = "100")]
        minimum_cast_cache: usize,
        #[clap(long)]
        version_receipts: bool,
    },
}

fn main() {
    let opts = Opts::parse();

    let outcome = match opts.command {
        Command::Vote {
            store,
            address,
            selection,
            version_receipts,
        } => {
            let config = store.config();
            let mut git = store.store();
            address
                .to_address()
                .map_err(|err| err.into())
                .and_then(|address| {
                    vote(&mut git, &config, address, &selection, version_receipts)
                })
        }
        Command::Merge {
            store,
            flush,
            minimum_cast_cache,
        } => merge(&mut store.store(), flush, minimum_cast_cache),
        Command::Tally {
            store,
            contest_uid,
            track_contests,
        } => {
            let config = store.config();
            let checks: Vec<String> = track_contests
                .as_deref()
                .map(|digests| digests.split(',').map(|d| d.to_string()).collect())
                .unwrap_or_default();
            tally(
                &mut store.store(),
                &config,
                contest_uid.as_deref(),
                &checks,
            )
        }
        Command::ShowContest {
            store,
            contest_check,
        } => show_contest(&mut store.store(), &contest_check),
        Command::MockElection {
            store,
            address,
            device,
            iterations,
            flush_mode,
            minimum_cast_cache,
            version_receipts,
        } => {
            let config = store.config();
            let mut git = store.store();
            address
                .to_address()
                .map_err(|err| err.into())
                .and_then(|address| {
                    mock_election(
                        &mut git,
                        &config,
                        address,
                        device,
                        iterations,
                        flush_mode,
                        minimum_cast_cache,
                        version_receipts,
                    )
                })
        }
    };

    if let Err(err) = outcome {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
