mod merge;
mod mock_election;
mod show_contest;
mod tally;
mod vote;

pub use merge::merge;
pub use mock_election::{mock_election, Device};
pub use show_contest::show_contest;
pub use tally::{contest_batches, tally};
pub use vote::vote;
