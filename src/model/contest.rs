use crate::globals;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use thiserror::Error;

/// How a contest is tabulated. `rcv` is sequential (multi-seat IRV);
/// proportional RCV is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TallyType {
    Plurality,
    Rcv,
    Pwc,
}

impl TallyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TallyType::Plurality => "plurality",
            TallyType::Rcv => "rcv",
            TallyType::Pwc => "pwc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContestType {
    Candidate,
    Ticket,
    Question,
}

/// A single contest choice. Configuration files may spell a choice as a
/// bare string; it deserializes as a record with only `name` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ChoiceRepr")]
pub struct Choice {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_names: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChoiceRepr {
    Name(String),
    Full(ChoiceRecord),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ChoiceRecord {
    name: String,
    #[serde(default)]
    party: Option<String>,
    #[serde(default)]
    ticket_names: Option<Vec<String>>,
}

impl From<ChoiceRepr> for Choice {
    fn from(repr: ChoiceRepr) -> Choice {
        match repr {
            ChoiceRepr::Name(name) => Choice {
                name,
                party: None,
                ticket_names: None,
            },
            ChoiceRepr::Full(record) => Choice {
                name: record.name,
                party: record.party,
                ticket_names: record.ticket_names,
            },
        }
    }
}

/// An invalid voter action against a contest. Non-fatal; surfaced to the
/// UI layer and recovered there.
#[derive(Error, Debug, PartialEq)]
pub enum SelectionError {
    #[error("the choice offset ({offset}) is out of range ({len} choices)")]
    OffsetOutOfRange { offset: usize, len: usize },
    #[error("the specified selection ({0}) is not one of the available choices")]
    UnknownChoice(String),
    #[error(
        "the selection ({selection}) has already been selected for \
         contest ({contest_name})"
    )]
    DuplicateSelection {
        selection: String,
        contest_name: String,
    },
    #[error("no more than {max} selections are allowed for this contest")]
    TooManySelections { max: usize },
}

/// A validated contest record. The same record type serves as the blank
/// template in a ballot, the voter-mutated cast contest, and the CVR
/// payload parsed back out of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Contest {
    pub choices: Vec<Choice>,
    pub tally: TallyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub win_by: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_selections: Option<usize>,
    #[serde(deserialize_with = "de_open_positions")]
    pub open_positions: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub contest_type: ContestType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_titles: Option<Vec<String>>,
    pub contest_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ggo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub selection: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cast_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub election_upstream_remote: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !b
}

/// `open_positions` must be a positive integer; configuration files may
/// spell it as a string of digits.
fn de_open_positions<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    struct OpenPositionsVisitor;

    impl<'de> Visitor<'de> for OpenPositionsVisitor {
        type Value = u32;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a positive integer or string of digits")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u32, E> {
            if value < 1 {
                return Err(E::custom("open_positions must be greater than zero"));
            }
            u32::try_from(value).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u32, E> {
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
                return Err(E::custom(format!(
                    "open_positions must be a non zero positive integer ({})",
                    value
                )));
            }
            let parsed: u32 = value.parse().map_err(E::custom)?;
            self.visit_u64(parsed as u64)
        }
    }

    deserializer.deserialize_any(OpenPositionsVisitor)
}

impl Contest {
    /// The pure list of choice names, in ballot order.
    pub fn choice_names(&self) -> Vec<String> {
        self.choices.iter().map(|c| c.name.clone()).collect()
    }

    /// Effective selection ceiling: defaults to 1 for plurality and the
    /// number of choices otherwise.
    pub fn effective_max_selections(&self) -> usize {
        self.max_selections.unwrap_or(match self.tally {
            TallyType::Plurality => 1,
            _ => self.choices.len(),
        })
    }

    /// Structural problems in this record, independent of where it came
    /// from. Empty means valid. Deviations accumulate so callers can
    /// report them all at once.
    pub fn schema_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.choices.is_empty() {
            problems.push("contest has no choices".to_string());
        }
        match self.contest_type {
            ContestType::Ticket => {
                let titles = match &self.ticket_titles {
                    Some(titles) => titles,
                    None => {
                        problems
                            .push("ticket contest does not define ticket_titles".to_string());
                        return problems;
                    }
                };
                for choice in &self.choices {
                    match &choice.ticket_names {
                        None => problems.push(format!(
                            "ticket contest choice ({}) does not contain ticket_names",
                            choice.name
                        )),
                        Some(names) if names.len() != titles.len() => problems.push(format!(
                            "the length of ticket_names and ticket_titles must match - \
                             {} != {}",
                            names.len(),
                            titles.len()
                        )),
                        Some(_) => {}
                    }
                }
            }
            _ => {
                if self.ticket_titles.is_some() {
                    problems.push(
                        "contest_type is not a ticket contest but defines ticket_titles"
                            .to_string(),
                    );
                }
                for choice in &self.choices {
                    if choice.ticket_names.is_some() {
                        problems.push(format!(
                            "contest_type is not a ticket contest but choice ({}) \
                             contains ticket_names",
                            choice.name
                        ));
                    }
                }
            }
        }
        let names = self.choice_names();
        let mut seen = std::collections::BTreeSet::new();
        for selection in &self.selection {
            if !names.iter().any(|n| n == selection) {
                problems.push(format!(
                    "selection ({}) is not one of the contest choices",
                    selection
                ));
            }
            if !seen.insert(selection) {
                problems.push(format!("selection ({}) appears more than once", selection));
            }
        }
        if self.selection.len() > self.effective_max_selections() {
            problems.push(format!(
                "{} selections exceed max_selections ({})",
                self.selection.len(),
                self.effective_max_selections()
            ));
        }
        problems
    }

    /// Problems only meaningful for a contest as declared in the election
    /// configuration (before defaults are derived).
    pub fn config_problems(&self) -> Vec<String> {
        let mut problems = self.schema_problems();
        if self.win_by.is_some() && self.tally != TallyType::Plurality {
            problems.push(
                "setting win_by in a non plurality contest is not supported".to_string(),
            );
        }
        problems
    }

    /// Derive the defaulted fields. Applied once, when the contest enters
    /// the blank-ballot stream.
    pub fn apply_defaults(&mut self) {
        if self.max_selections.is_none() {
            self.max_selections = Some(self.effective_max_selections());
        }
        if self.win_by.is_none() {
            // Droop quota fraction; the win threshold is strictly greater
            // than this fraction of the non-blank vote.
            self.win_by = Some(1.0 / (self.open_positions as f64 + 1.0));
        }
        if self.election_upstream_remote.is_none() {
            self.election_upstream_remote = Some(globals::ELECTION_UPSTREAM_REMOTE.to_string());
        }
    }

    /// Record a selection by choice name. Insertion order is the rank for
    /// RCV contests.
    pub fn add_selection_name(&mut self, selection: &str) -> Result<(), SelectionError> {
        let names = self.choice_names();
        if !names.iter().any(|n| n == selection) {
            return Err(SelectionError::UnknownChoice(selection.to_string()));
        }
        if self.selection.iter().any(|s| s == selection) {
            return Err(SelectionError::DuplicateSelection {
                selection: selection.to_string(),
                contest_name: self.contest_name.clone(),
            });
        }
        let max = self.effective_max_selections();
        if self.selection.len() >= max {
            return Err(SelectionError::TooManySelections { max });
        }
        self.selection.push(selection.to_string());
        Ok(())
    }

    /// Record a selection by zero-based choice offset.
    pub fn add_selection_offset(&mut self, offset: usize) -> Result<(), SelectionError> {
        if offset >= self.choices.len() {
            return Err(SelectionError::OffsetOutOfRange {
                offset,
                len: self.choices.len(),
            });
        }
        let name = self.choices[offset].name.clone();
        self.add_selection_name(&name)
    }

    /// Clear the selection (as when self adjudicating).
    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Render a ticket choice with its paired titles, e.g.
    /// `Smith (President: Smith; Vice President: Jones)`.
    pub fn pretty_print_a_ticket(&self, choice_name: &str) -> Result<String, SelectionError> {
        let titles = self.ticket_titles.as_deref().unwrap_or(&[]);
        for choice in &self.choices {
            if choice.name == choice_name {
                let names = choice.ticket_names.as_deref().unwrap_or(&[]);
                let details: Vec<String> = titles
                    .iter()
                    .zip(names.iter())
                    .map(|(title, name)| format!("{}: {}", title, name))
                    .collect();
                return Ok(format!("{} ({})", choice_name, details.join("; ")));
            }
        }
        Err(SelectionError::UnknownChoice(choice_name.to_string()))
    }
}

impl fmt::Display for Contest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match crate::util::to_canonical_json(self) {
            Ok(text) => f.write_str(text.trim_end()),
            Err(_) => Err(fmt::Error),
        }
    }
}
