use crate::merge::merge_contests;
use crate::store::VoteStore;
use rand::rngs::OsRng;
use std::error::Error;

/// Run one randomized merge sweep of pending CVR branches into the
/// mainline. With fewer than `minimum_cast_cache` branches outstanding
/// for a contest, that contest is skipped unless `flush` is set.
pub fn merge<S: VoteStore>(
    store: &mut S,
    flush: bool,
    minimum_cast_cache: usize,
) -> Result<(), Box<dyn Error>> {
    let summary = merge_contests(store, flush, minimum_cast_cache, &mut OsRng)?;
    println!("Merged {} contest branches", summary.merged_total());
    for (uid, outstanding) in &summary.outstanding {
        println!("  contest {}: {} branches outstanding", uid, outstanding);
    }
    Ok(())
}
