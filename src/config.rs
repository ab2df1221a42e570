use crate::model::contest::Contest;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Structural problem in the election DAG. Fatal; aborts the load.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file ({path}): {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file ({path}): {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("the GGO graph contains a cycle through ({0})")]
    Cycle(String),
    #[error("the GGO node ({0}) is declared more than once")]
    DuplicateNode(String),
    #[error("node ({node}) references an unknown GGO path ({referenced})")]
    UnknownReference { node: String, referenced: String },
    #[error("node ({node}) has an invalid address_map regex ({pattern}): {source}")]
    BadRegex {
        node: String,
        pattern: String,
        source: regex::Error,
    },
    #[error("the uid of contest ({contest_name}) in node ({node}) is already set")]
    UidAlreadySet { node: String, contest_name: String },
    #[error("node ({node}) has invalid contests: {problems:?}")]
    ContestProblems { node: String, problems: Vec<String> },
}

/// One unique-ballots entry: a set of anchored address regexes paired
/// with the GGO paths that contribute contests to that ballot.
#[derive(Debug)]
pub struct UniqueBallotEntry {
    pub addresses: Vec<Regex>,
    pub ggos: Vec<String>,
}

impl UniqueBallotEntry {
    /// True when any of the entry's regexes matches the number-and-street
    /// form of an address. Patterns are anchored at the start.
    pub fn matches(&self, str_address: &str) -> bool {
        self.addresses.iter().any(|rx| rx.is_match(str_address))
    }
}

/// A node in the election configuration DAG.
#[derive(Debug)]
pub struct GgoNode {
    /// Unique identifier of the node within the election: its path from
    /// the root, `.` for the root itself.
    pub path: String,
    /// Jurisdiction kind: `root`, `state`, `town`, ...
    pub kind: String,
    /// On-disk subdirectory relative to the election data root.
    pub subdir: String,
    pub name: Option<String>,
    /// Empty means implicit-by-hierarchy: addresses resolve through this
    /// node without a ballot of their own.
    pub address_map: Vec<UniqueBallotEntry>,
    pub contests: Vec<Contest>,
    children: Vec<String>,
}

impl GgoNode {
    pub fn unique_ballots(&self) -> &[UniqueBallotEntry] {
        &self.address_map
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GgoConfigFile {
    #[serde(default)]
    name: Option<String>,
    /// Owned child GGOs: kind directory to instance names, loaded from
    /// `{subdir}/GGOs/{kind}/{instance}/config.json`.
    #[serde(default)]
    ggos: BTreeMap<String, Vec<String>>,
    /// Shared child GGOs referenced by node path (what makes the graph a
    /// DAG rather than a tree).
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    contests: Vec<Contest>,
    #[serde(default)]
    address_map: AddressMapFile,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AddressMapFile {
    #[serde(default, rename = "unique-ballots")]
    unique_ballots: Vec<UniqueBallotFile>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UniqueBallotFile {
    addresses: Vec<String>,
    ggos: Vec<String>,
}

#[derive(Debug)]
struct UidEntry {
    contest_name: String,
    ggo: String,
}

/// The election configuration: a single-rooted DAG of GGO nodes loaded
/// eagerly from a tree of per-GGO config files, with contest uids
/// stamped in topological order. Immutable once loaded.
#[derive(Debug)]
pub struct ElectionConfig {
    root_dir: PathBuf,
    nodes: HashMap<String, GgoNode>,
    topo: Vec<String>,
    uids: BTreeMap<String, UidEntry>,
}

impl ElectionConfig {
    /// Load the configuration DAG rooted at `root_dir/config.json`.
    pub fn load(root_dir: &Path) -> Result<ElectionConfig, ConfigError> {
        let mut config = ElectionConfig {
            root_dir: root_dir.to_path_buf(),
            nodes: HashMap::new(),
            topo: Vec::new(),
            uids: BTreeMap::new(),
        };
        let mut links: Vec<(String, Vec<String>)> = Vec::new();
        config.load_node(".", "", &mut links)?;
        config.resolve_links(links)?;
        config.check_acyclic()?;
        config.check_references()?;
        config.topo = config.topological_order()?;
        config.assign_uids()?;
        Ok(config)
    }

    /// Recursively load one owned node and its owned children.
    fn load_node(
        &mut self,
        path: &str,
        subdir: &str,
        links: &mut Vec<(String, Vec<String>)>,
    ) -> Result<(), ConfigError> {
        if self.nodes.contains_key(path) {
            return Err(ConfigError::DuplicateNode(path.to_string()));
        }
        let file_path = if subdir.is_empty() {
            self.root_dir.join("config.json")
        } else {
            self.root_dir.join(subdir).join("config.json")
        };
        let text = std::fs::read_to_string(&file_path).map_err(|source| ConfigError::Io {
            path: file_path.clone(),
            source,
        })?;
        let file: GgoConfigFile =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: file_path,
                source,
            })?;

        let mut address_map = Vec::new();
        for entry in file.address_map.unique_ballots {
            let mut addresses = Vec::new();
            for pattern in entry.addresses {
                // Anchor at the start, matching the resolver's
                // match-from-the-beginning contract.
                let anchored = format!("^(?:{})", pattern);
                let rx = Regex::new(&anchored).map_err(|source| ConfigError::BadRegex {
                    node: path.to_string(),
                    pattern,
                    source,
                })?;
                addresses.push(rx);
            }
            address_map.push(UniqueBallotEntry {
                addresses,
                ggos: entry.ggos,
            });
        }

        let mut children = Vec::new();
        let mut owned = Vec::new();
        for (kind_dir, instances) in &file.ggos {
            for instance in instances {
                let child_path = if path == "." {
                    format!("GGOs/{}/{}", kind_dir, instance)
                } else {
                    format!("{}/GGOs/{}/{}", path, kind_dir, instance)
                };
                children.push(child_path.clone());
                owned.push((child_path, kind_dir.clone()));
            }
        }
        children.extend(file.links.iter().cloned());
        if !file.links.is_empty() {
            links.push((path.to_string(), file.links));
        }

        self.nodes.insert(
            path.to_string(),
            GgoNode {
                path: path.to_string(),
                kind: if path == "." {
                    "root".to_string()
                } else {
                    singular_kind(path)
                },
                subdir: subdir.to_string(),
                name: file.name,
                address_map,
                contests: file.contests,
                children,
            },
        );

        for (child_path, _kind_dir) in owned {
            // The node path doubles as the on-disk subdirectory.
            let child_subdir = child_path.clone();
            self.load_node(&child_path, &child_subdir, links)?;
        }
        Ok(())
    }

    /// Every link must name a node that was loaded somewhere in the tree.
    fn resolve_links(&self, links: Vec<(String, Vec<String>)>) -> Result<(), ConfigError> {
        for (node, targets) in links {
            for target in targets {
                if !self.nodes.contains_key(&target) {
                    return Err(ConfigError::UnknownReference {
                        node,
                        referenced: target,
                    });
                }
            }
        }
        Ok(())
    }

    /// Depth-first cycle check over the child edges.
    fn check_acyclic(&self) -> Result<(), ConfigError> {
        let mut visited = HashSet::new();
        let mut in_stack = HashSet::new();
        self.dfs_cycle(".", &mut visited, &mut in_stack)
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        in_stack: &mut HashSet<String>,
    ) -> Result<(), ConfigError> {
        if in_stack.contains(node) {
            return Err(ConfigError::Cycle(node.to_string()));
        }
        if visited.contains(node) {
            return Ok(());
        }
        visited.insert(node.to_string());
        in_stack.insert(node.to_string());
        for child in self.children(node) {
            self.dfs_cycle(child, visited, in_stack)?;
        }
        in_stack.remove(node);
        Ok(())
    }

    /// Every GGO path named by a unique-ballots entry must resolve.
    fn check_references(&self) -> Result<(), ConfigError> {
        for node in self.nodes.values() {
            for entry in &node.address_map {
                for ggo in &entry.ggos {
                    if !self.is_node(ggo) {
                        return Err(ConfigError::UnknownReference {
                            node: node.path.clone(),
                            referenced: ggo.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm seeded at the root; children are visited in
    /// declaration order so the result is deterministic.
    fn topological_order(&self) -> Result<Vec<String>, ConfigError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for node in self.nodes.values() {
            in_degree.entry(&node.path).or_insert(0);
            for child in &node.children {
                *in_degree.entry(child).or_insert(0) += 1;
            }
        }
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(".");
        let mut order = Vec::new();
        while let Some(node) = queue.pop_front() {
            order.push(node.to_string());
            for child in self.children(node) {
                let degree = in_degree
                    .get_mut(child.as_str())
                    .expect("every child has an in-degree entry");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(child.as_str());
                }
            }
        }
        if order.len() != self.nodes.len() {
            // Unreached nodes mean a cycle or a disconnected subgraph.
            let missing = self
                .nodes
                .keys()
                .find(|path| !order.contains(path))
                .cloned()
                .unwrap_or_default();
            return Err(ConfigError::Cycle(missing));
        }
        Ok(order)
    }

    /// Stamp each contest with the next zero-padded uid while walking
    /// nodes in topological order, then validate and derive defaults.
    /// Uids are final once the config is frozen.
    fn assign_uids(&mut self) -> Result<(), ConfigError> {
        let mut next_uid = 0usize;
        for path in self.topo.clone() {
            let mut staged = Vec::new();
            let node = self
                .nodes
                .get_mut(&path)
                .expect("topological order only contains loaded nodes");
            for contest in &mut node.contests {
                if contest.uid.is_some() {
                    return Err(ConfigError::UidAlreadySet {
                        node: path.clone(),
                        contest_name: contest.contest_name.clone(),
                    });
                }
                let problems = contest.config_problems();
                if !problems.is_empty() {
                    return Err(ConfigError::ContestProblems {
                        node: path.clone(),
                        problems,
                    });
                }
                let uid = format!("{:04}", next_uid);
                next_uid += 1;
                contest.uid = Some(uid.clone());
                contest.ggo = Some(path.clone());
                contest.apply_defaults();
                staged.push((uid, contest.contest_name.clone()));
            }
            for (uid, contest_name) in staged {
                self.uids.insert(
                    uid,
                    UidEntry {
                        contest_name,
                        ggo: path.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn is_node(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// The node at `path`. Callers check `is_node` for paths from
    /// external input.
    pub fn node(&self, path: &str) -> &GgoNode {
        self.nodes
            .get(path)
            .unwrap_or_else(|| panic!("unknown GGO node ({})", path))
    }

    /// Direct children of a node, declaration order.
    pub fn children(&self, path: &str) -> &[String] {
        &self.node(path).children
    }

    /// All descendants of a node in breadth-first order, each visited
    /// exactly once. Cycle safe by construction.
    pub fn descendants(&self, path: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut out = Vec::new();
        visited.insert(path.to_string());
        queue.push_back(path);
        while let Some(node) = queue.pop_front() {
            for child in self.children(node) {
                if visited.insert(child.clone()) {
                    out.push(child.clone());
                    queue.push_back(child.as_str());
                }
            }
        }
        out
    }

    /// All node paths in topological order, root first.
    pub fn topo_order(&self) -> &[String] {
        &self.topo
    }

    /// The pretty-print name of a contest uid: `{uid} - {contest_name}`.
    pub fn uid_pp_name(&self, uid: &str) -> Option<String> {
        self.uids
            .get(uid)
            .map(|entry| format!("{} - {}", uid, entry.contest_name))
    }

    /// The (contest_name, ggo) pair a contest uid maps to.
    pub fn uid_entry(&self, uid: &str) -> Option<(&str, &str)> {
        self.uids
            .get(uid)
            .map(|entry| (entry.contest_name.as_str(), entry.ggo.as_str()))
    }

    /// Every contest uid in the election, ascending.
    pub fn contest_uids(&self) -> impl Iterator<Item = &str> {
        self.uids.keys().map(|uid| uid.as_str())
    }

    /// Where a blank ballot lives for a given ballot subdir.
    pub fn blank_ballot_path(&self, ballot_subdir: &str) -> PathBuf {
        let base = if ballot_subdir.is_empty() {
            self.root_dir.clone()
        } else {
            self.root_dir.join(ballot_subdir)
        };
        base.join("blank-ballots").join("json").join("ballot.json")
    }
}

/// `GGOs/states/Massachusetts/...` ends in `.../GGOs/{kind-dir}/{name}`;
/// the node kind is the singular of the kind directory.
fn singular_kind(path: &str) -> String {
    let parts: Vec<&str> = path.rsplitn(3, '/').collect();
    let kind_dir = if parts.len() == 3 { parts[1] } else { "" };
    match kind_dir {
        "states" => "state",
        "towns" => "town",
        "counties" => "county",
        "SchoolDistricts" => "SchoolDistrict",
        "CouncilDistricts" => "CouncilDistrict",
        "Precincts" => "Precinct",
        other => other,
    }
    .to_string()
}

#[cfg(test)]
pub mod test_fixtures {
    use std::fs;
    use std::path::Path;

    pub fn write_config(dir: &Path, contents: serde_json::Value) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("config.json"),
            serde_json::to_string_pretty(&contents).unwrap(),
        )
        .unwrap();
    }

    /// Root -> state -> two towns; the second town links to the first
    /// town's school district, making the graph a DAG.
    pub fn sample_election(root: &Path) {
        write_config(
            root,
            serde_json::json!({
                "name": "sample election",
                "ggos": {"states": ["Massachusetts"]},
                "contests": [{
                    "choices": ["yes", "no"],
                    "tally": "plurality",
                    "open_positions": "1",
                    "contest_type": "question",
                    "contest_name": "question 1"
                }]
            }),
        );
        write_config(
            &root.join("GGOs/states/Massachusetts"),
            serde_json::json!({
                "ggos": {"towns": ["Concord", "Lincoln"]},
                "contests": [{
                    "choices": ["Alice", "Bob", "Carol"],
                    "tally": "rcv",
                    "open_positions": "1",
                    "contest_type": "candidate",
                    "contest_name": "governor"
                }]
            }),
        );
        write_config(
            &root.join("GGOs/states/Massachusetts/GGOs/towns/Concord"),
            serde_json::json!({
                "ggos": {"SchoolDistricts": ["Emerson"]},
                "contests": [{
                    "choices": ["Dave", "Eve"],
                    "tally": "plurality",
                    "open_positions": "1",
                    "contest_type": "candidate",
                    "contest_name": "mayor"
                }],
                "address_map": {
                    "unique-ballots": [{
                        "addresses": ["[0-9]+ Main Street"],
                        "ggos": [
                            ".",
                            "GGOs/states/Massachusetts",
                            "GGOs/states/Massachusetts/GGOs/towns/Concord",
                            "GGOs/states/Massachusetts/GGOs/towns/Concord/GGOs/SchoolDistricts/Emerson"
                        ]
                    }]
                }
            }),
        );
        write_config(
            &root.join("GGOs/states/Massachusetts/GGOs/towns/Concord/GGOs/SchoolDistricts/Emerson"),
            serde_json::json!({
                "contests": [{
                    "choices": ["Frank", "Grace"],
                    "tally": "plurality",
                    "open_positions": "1",
                    "contest_type": "candidate",
                    "contest_name": "school board"
                }]
            }),
        );
        write_config(
            &root.join("GGOs/states/Massachusetts/GGOs/towns/Lincoln"),
            serde_json::json!({
                "links": [
                    "GGOs/states/Massachusetts/GGOs/towns/Concord/GGOs/SchoolDistricts/Emerson"
                ],
                "address_map": {
                    "unique-ballots": [{
                        "addresses": ["[0-9]+ Oak Lane"],
                        "ggos": [
                            ".",
                            "GGOs/states/Massachusetts",
                            "GGOs/states/Massachusetts/GGOs/towns/Lincoln"
                        ]
                    }]
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::{sample_election, write_config};
    use super::*;

    #[test]
    fn test_load_and_topo_order() {
        let dir = tempfile::tempdir().unwrap();
        sample_election(dir.path());
        let config = ElectionConfig::load(dir.path()).unwrap();
        assert!(config.is_node("."));
        assert!(config.is_node("GGOs/states/Massachusetts/GGOs/towns/Concord"));
        assert_eq!(config.topo_order()[0], ".");
        let topo = config.topo_order();
        let state = topo
            .iter()
            .position(|p| p == "GGOs/states/Massachusetts")
            .unwrap();
        let town = topo
            .iter()
            .position(|p| p == "GGOs/states/Massachusetts/GGOs/towns/Concord")
            .unwrap();
        assert!(state < town);
        assert_eq!(
            config.node("GGOs/states/Massachusetts").kind,
            "state".to_string()
        );
    }

    #[test]
    fn test_uid_assignment_in_topo_order() {
        let dir = tempfile::tempdir().unwrap();
        sample_election(dir.path());
        let config = ElectionConfig::load(dir.path()).unwrap();
        // Root's question gets the first uid; the state's governor the next.
        assert_eq!(config.node(".").contests[0].uid.as_deref(), Some("0000"));
        assert_eq!(
            config.node("GGOs/states/Massachusetts").contests[0]
                .uid
                .as_deref(),
            Some("0001")
        );
        assert_eq!(
            config.uid_pp_name("0000").unwrap(),
            "0000 - question 1".to_string()
        );
        let uids: Vec<&str> = config.contest_uids().collect();
        assert_eq!(uids, vec!["0000", "0001", "0002", "0003"]);
        // Defaults were derived at load time.
        let governor = &config.node("GGOs/states/Massachusetts").contests[0];
        assert_eq!(governor.max_selections, Some(3));
        assert_eq!(governor.ggo.as_deref(), Some("GGOs/states/Massachusetts"));
    }

    #[test]
    fn test_descendants_cover_links_once() {
        let dir = tempfile::tempdir().unwrap();
        sample_election(dir.path());
        let config = ElectionConfig::load(dir.path()).unwrap();
        let descendants = config.descendants(".");
        assert_eq!(descendants.len(), config.topo_order().len() - 1);
        let lincoln = config.descendants("GGOs/states/Massachusetts/GGOs/towns/Lincoln");
        assert_eq!(
            lincoln,
            vec![
                "GGOs/states/Massachusetts/GGOs/towns/Concord/GGOs/SchoolDistricts/Emerson"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_unknown_link_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            serde_json::json!({
                "links": ["GGOs/states/Nowhere"]
            }),
        );
        match ElectionConfig::load(dir.path()) {
            Err(ConfigError::UnknownReference { referenced, .. }) => {
                assert_eq!(referenced, "GGOs/states/Nowhere");
            }
            other => panic!("expected UnknownReference, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            serde_json::json!({
                "ggos": {"states": ["Massachusetts"]}
            }),
        );
        write_config(
            &dir.path().join("GGOs/states/Massachusetts"),
            serde_json::json!({
                "links": ["."]
            }),
        );
        match ElectionConfig::load(dir.path()) {
            Err(ConfigError::Cycle(_)) => {}
            other => panic!("expected Cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_address_map_regex_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            serde_json::json!({
                "address_map": {
                    "unique-ballots": [{"addresses": ["[unclosed"], "ggos": ["."]}]
                }
            }),
        );
        match ElectionConfig::load(dir.path()) {
            Err(ConfigError::BadRegex { pattern, .. }) => assert_eq!(pattern, "[unclosed"),
            other => panic!("expected BadRegex, got {:?}", other),
        }
    }

    #[test]
    fn test_preset_uid_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            serde_json::json!({
                "contests": [{
                    "choices": ["yes", "no"],
                    "tally": "plurality",
                    "open_positions": 1,
                    "contest_type": "question",
                    "contest_name": "question 1",
                    "uid": "0042"
                }]
            }),
        );
        match ElectionConfig::load(dir.path()) {
            Err(ConfigError::UidAlreadySet { contest_name, .. }) => {
                assert_eq!(contest_name, "question 1");
            }
            other => panic!("expected UidAlreadySet, got {:?}", other),
        }
    }
}
