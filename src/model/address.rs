use crate::config::ElectionConfig;
use crate::globals;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// An address cannot be resolved to a unique ballot. Nothing is mutated
/// when one of these is returned from resolution.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error(
        "addresses must include values for the following fields: {required:?}; \
         the following fields are undefined: {missing:?}"
    )]
    MissingFields {
        required: Vec<String>,
        missing: Vec<String>,
    },
    #[error("bad comma separated address ({0})")]
    BadCsv(String),
    #[error("bad election configuration node name ({0})")]
    UnknownNode(String),
    #[error("the supplied address ({0}) does not match any address_map")]
    NoAddressMatch(String),
    #[error("the supplied address ({address}) matches multiple address_maps: {hits:?}")]
    AmbiguousAddress { address: String, hits: Vec<String> },
}

/// An address in canonical dictionary form. Individual fields are never
/// absent; if empty/blank they are the empty string. All fields are
/// strings, not numbers.
#[derive(Debug, Clone, Default)]
pub struct Address {
    pub number: String,
    pub street: String,
    pub substreet: String,
    pub town: String,
    pub state: String,
    pub country: String,
    pub zipcode: String,
    /// Ordered list of active GGO node paths, root sentinel first.
    /// Populated by `map_ggos`.
    pub active_ggos: Vec<String>,
    /// The leaf node holding this address's blank ballot and CVRs.
    pub ballot_node: String,
    pub ballot_subdir: String,
}

impl Address {
    const KEYS: &'static [&'static str] = &[
        "number",
        "street",
        "substreet",
        "town",
        "state",
        "country",
        "zipcode",
    ];

    /// Build an address from explicit fields, validating that every
    /// required field is present. A voting center only needs the fields
    /// that select GGO levels.
    pub fn new(fields: AddressFields, voting_center: bool) -> Result<Address, ResolutionError> {
        let address = Address {
            number: fields.number.unwrap_or_default(),
            street: fields.street.unwrap_or_default(),
            substreet: fields.substreet.unwrap_or_default(),
            town: fields.town.unwrap_or_default(),
            state: fields.state.unwrap_or_default(),
            country: fields.country.unwrap_or_default(),
            zipcode: fields.zipcode.unwrap_or_default(),
            ..Address::default()
        };
        let mut required: Vec<String> = globals::REQUIRED_GGO_ADDRESS_FIELDS
            .iter()
            .map(|f| f.to_string())
            .collect();
        if !voting_center {
            required.extend(
                globals::REQUIRED_NG_ADDRESS_FIELDS
                    .iter()
                    .map(|f| f.to_string()),
            );
        }
        let missing: Vec<String> = required
            .iter()
            .filter(|field| address.value(field).is_empty())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ResolutionError::MissingFields { required, missing });
        }
        Ok(address)
    }

    /// Parse a one-line comma separated address. The grammar is
    /// `number, street, town, state` or
    /// `number, street, substreet, town, state`, dispatched on field
    /// count.
    pub fn from_csv(line: &str) -> Result<Address, ResolutionError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(line.as_bytes());
        let record = match reader.records().next() {
            Some(Ok(record)) => record,
            _ => return Err(ResolutionError::BadCsv(line.to_string())),
        };
        let fields: Vec<&str> = record.iter().collect();
        let (substreet, town, state) = match fields.len() {
            4 => ("", fields[2], fields[3]),
            5 => (fields[2], fields[3], fields[4]),
            _ => return Err(ResolutionError::BadCsv(line.to_string())),
        };
        Address::new(
            AddressFields {
                number: Some(fields[0].to_string()),
                street: Some(fields[1].to_string()),
                substreet: Some(substreet.to_string()),
                town: Some(town.to_string()),
                state: Some(state.to_string()),
                ..AddressFields::default()
            },
            false,
        )
    }

    /// The value of a named address field. Unknown names are empty.
    pub fn value(&self, field: &str) -> &str {
        match field {
            "number" => &self.number,
            "street" => &self.street,
            "substreet" => &self.substreet,
            "town" => &self.town,
            "state" => &self.state,
            "country" => &self.country,
            "zipcode" => &self.zipcode,
            _ => "",
        }
    }

    /// The number and street, the form matched against address_map
    /// regexes.
    pub fn str_address(&self) -> String {
        format!("{} {}", self.number, self.street)
            .trim()
            .to_string()
    }

    /// Map this address onto the election configuration, filling in
    /// `active_ggos`, `ballot_node`, and `ballot_subdir`.
    ///
    /// The walk seeds the root sentinel, descends one GGO level per
    /// required address field, then scans every descendant of the leaf
    /// exactly once for a matching unique-ballots entry. Exactly one
    /// descendant must match.
    pub fn map_ggos(&mut self, config: &ElectionConfig) -> Result<(), ResolutionError> {
        let mut active_ggos = vec![".".to_string()];
        let mut breadcrumb = String::new();
        for field in globals::REQUIRED_GGO_ADDRESS_FIELDS {
            let kind_dir = globals::ggo_kind_dir(field)
                .expect("required GGO address fields map to a kind directory");
            let node = if breadcrumb.is_empty() {
                format!("GGOs/{}/{}", kind_dir, self.value(field))
            } else {
                format!("{}/GGOs/{}/{}", breadcrumb, kind_dir, self.value(field))
            };
            if !config.is_node(&node) {
                return Err(ResolutionError::UnknownNode(node));
            }
            active_ggos.push(node.clone());
            breadcrumb = node;
        }

        let leaf = active_ggos
            .last()
            .expect("active_ggos contains at least the root sentinel")
            .clone();
        let mut footsteps = HashSet::new();
        let mut hits = Vec::new();
        self.walk_descendants(config, &leaf, &mut footsteps, &mut hits, &mut active_ggos);

        if hits.is_empty() {
            return Err(ResolutionError::NoAddressMatch(self.to_string()));
        }
        if hits.len() > 1 {
            return Err(ResolutionError::AmbiguousAddress {
                address: self.to_string(),
                hits,
            });
        }

        // The ballot lives at the deepest contributing GGO, which is the
        // last entry of the active list.
        let ballot_node = active_ggos
            .last()
            .expect("active_ggos contains at least the root sentinel")
            .clone();
        self.ballot_subdir = config.node(&ballot_node).subdir.clone();
        self.ballot_node = ballot_node;
        self.active_ggos = active_ggos;
        Ok(())
    }

    /// Visit `node` and all its descendants exactly once, collecting the
    /// GGO contributions of every unique-ballots entry that matches this
    /// address. The graph is acyclic by invariant but the walk is still
    /// cycle safe.
    fn walk_descendants(
        &self,
        config: &ElectionConfig,
        node: &str,
        footsteps: &mut HashSet<String>,
        hits: &mut Vec<String>,
        active_ggos: &mut Vec<String>,
    ) {
        let str_address = self.str_address();
        for entry in config.node(node).unique_ballots() {
            if entry.matches(&str_address) {
                for ggo in &entry.ggos {
                    if !active_ggos.contains(ggo) {
                        active_ggos.push(ggo.clone());
                    }
                }
                hits.push(node.to_string());
            }
        }
        footsteps.insert(node.to_string());
        for child in config.children(node) {
            if footsteps.contains(child) {
                continue;
            }
            self.walk_descendants(config, child, footsteps, hits, active_ggos);
        }
    }
}

impl fmt::Display for Address {
    /// Space separated non-empty address fields.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = Address::KEYS
            .iter()
            .map(|key| self.value(key))
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&text)
    }
}

/// Optional fields for building an `Address`; anything omitted is the
/// empty string.
#[derive(Debug, Clone, Default)]
pub struct AddressFields {
    pub number: Option<String>,
    pub street: Option<String>,
    pub substreet: Option<String>,
    pub town: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zipcode: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_length_dispatch() {
        let four = Address::from_csv("123, Main Street, Concord, Massachusetts").unwrap();
        assert_eq!(four.number, "123");
        assert_eq!(four.street, "Main Street");
        assert_eq!(four.substreet, "");
        assert_eq!(four.town, "Concord");
        assert_eq!(four.state, "Massachusetts");

        let five = Address::from_csv("123, Main Street, Unit 2, Concord, Massachusetts").unwrap();
        assert_eq!(five.substreet, "Unit 2");
        assert_eq!(five.town, "Concord");
        assert_eq!(five.state, "Massachusetts");

        assert!(Address::from_csv("123, Main Street, Concord").is_err());
    }

    #[test]
    fn test_missing_required_fields() {
        let result = Address::new(
            AddressFields {
                state: Some("Massachusetts".to_string()),
                ..AddressFields::default()
            },
            false,
        );
        match result {
            Err(ResolutionError::MissingFields { missing, .. }) => {
                assert!(missing.contains(&"town".to_string()));
                assert!(missing.contains(&"number".to_string()));
            }
            other => panic!("expected MissingFields, got {:?}", other),
        }
    }

    #[test]
    fn test_voting_center_only_needs_ggo_fields() {
        let address = Address::new(
            AddressFields {
                town: Some("Concord".to_string()),
                state: Some("Massachusetts".to_string()),
                ..AddressFields::default()
            },
            true,
        )
        .unwrap();
        assert_eq!(address.str_address(), "");
        assert_eq!(address.to_string(), "Concord Massachusetts");
    }
}
