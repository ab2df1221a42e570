//! Election-wide constants. Each knob has exactly one effect; see the
//! doc comment on each.

/// Number of peer digest rows in a versioned ballot receipt. Also the
/// minimum number of un-merged branches that must stay outstanding per
/// contest before the merge controller will touch that contest.
pub const BALLOT_RECEIPT_ROWS: usize = 100;

/// Address fields that select a GGO level, in walk order (root first).
pub const REQUIRED_GGO_ADDRESS_FIELDS: &[&str] = &["state", "town"];

/// Address fields that are required but do not themselves select a GGO.
pub const REQUIRED_NG_ADDRESS_FIELDS: &[&str] = &["number", "street"];

/// Subdirectory of the election data repository that holds the live
/// election (branches, CVRs, blank ballots).
pub const ROOT_ELECTION_DATA_SUBDIR: &str = "ElectionData";

/// Subdirectory prefix under which per-contest CVR files and branches
/// live: `{CONTEST_FILE_SUBDIR}/{uid}/...`.
pub const CONTEST_FILE_SUBDIR: &str = "CVRs";

/// Upstream remote URL stamped into every contest for voter UX.
pub const ELECTION_UPSTREAM_REMOTE: &str =
    "https://github.com/TrustTheVote-Project/tracked-vote";

/// Map an address field name to the GGO kind directory it selects.
pub fn ggo_kind_dir(field: &str) -> Option<&'static str> {
    match field {
        "state" => Some("states"),
        "town" => Some("towns"),
        "county" => Some("counties"),
        "school_district" => Some("SchoolDistricts"),
        "council_district" => Some("CouncilDistricts"),
        "precinct" => Some("Precincts"),
        _ => None,
    }
}

/// 1 -> "1st", 2 -> "2nd", etc. Used in tally output.
pub fn make_ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (1, 11) | (2, 12) | (3, 13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_ordinal() {
        assert_eq!(make_ordinal(1), "1st");
        assert_eq!(make_ordinal(2), "2nd");
        assert_eq!(make_ordinal(3), "3rd");
        assert_eq!(make_ordinal(4), "4th");
        assert_eq!(make_ordinal(11), "11th");
        assert_eq!(make_ordinal(12), "12th");
        assert_eq!(make_ordinal(21), "21st");
        assert_eq!(make_ordinal(112), "112th");
    }
}
