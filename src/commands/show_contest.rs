use crate::store::{StoreError, VoteStore};
use lazy_static::lazy_static;
use regex::Regex;
use std::error::Error;

lazy_static! {
    static ref CONTEST_CHECK_RX: Regex = Regex::new(r"^[0-9a-f]+(,[0-9a-f]+)*$").unwrap();
}

/// Validate a comma separated list of contest digests against the store
/// and print each CVR payload. Missing digests and digests that are not
/// commits are reported together.
pub fn show_contest<S: VoteStore>(store: &mut S, contest_check: &str) -> Result<(), Box<dyn Error>> {
    if !CONTEST_CHECK_RX.is_match(contest_check) {
        return Err(
            "the contest check only accepts a comma separated (no spaces) list of digests"
                .to_string()
                .into(),
        );
    }
    store.pull()?;

    let digests: Vec<&str> = contest_check.split(',').collect();
    let mut error_digests = Vec::new();
    for digest in &digests {
        match store.cat_file_type(digest) {
            Ok(kind) if kind == "commit" => {}
            Ok(kind) => {
                crate::log_error!("invalid digest type: digest={} type={}", digest, kind);
                error_digests.push(digest.to_string());
            }
            Err(StoreError::UnknownDigest(_)) => {
                crate::log_error!("missing digest: digest={}", digest);
                error_digests.push(digest.to_string());
            }
            Err(err) => return Err(err.into()),
        }
    }
    if !error_digests.is_empty() {
        return Err(format!("found {} invalid digest(s)", error_digests.len()).into());
    }

    for digest in digests {
        println!("{}:", digest);
        println!("{}", store.show(digest)?);
    }
    Ok(())
}
