use crate::config::ElectionConfig;
use crate::model::address::Address;
use crate::model::contest::Contest;
use crate::util::{read_serialized, write_serialized};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// An ordered sequence of contests plus the resolved address location
/// that owns it. Contest order is stable from blank through cast, merge,
/// and tally. The ballot refers back to the configuration by logical
/// path only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ballot {
    pub contests: Vec<Contest>,
    pub active_ggos: Vec<String>,
    pub ballot_node: String,
    pub ballot_subdir: String,
}

impl Ballot {
    /// Produce a blank ballot for a resolved address by walking its
    /// active GGOs in order and concatenating each node's contests,
    /// deduplicating by uid while preserving first occurrence.
    pub fn blank(address: &Address, config: &ElectionConfig) -> Ballot {
        let mut contests = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for ggo in &address.active_ggos {
            for contest in &config.node(ggo).contests {
                let uid = contest
                    .uid
                    .as_ref()
                    .expect("contests are stamped with a uid at configuration load");
                if seen.insert(uid.clone()) {
                    contests.push(contest.clone());
                }
            }
        }
        Ballot {
            contests,
            active_ggos: address.active_ggos.clone(),
            ballot_node: address.ballot_node.clone(),
            ballot_subdir: address.ballot_subdir.clone(),
        }
    }

    pub fn from_file(path: &Path) -> std::io::Result<Ballot> {
        read_serialized(path)
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_serialized(path, self)
    }

    /// Structural problems across all contests, tagged by uid. Empty
    /// means the ballot is valid to accept.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for contest in &self.contests {
            let uid = contest.uid.as_deref().unwrap_or("????");
            for problem in contest.schema_problems() {
                problems.push(format!("{}: {}", uid, problem));
            }
        }
        problems
    }
}
