mod condorcet;

use crate::globals::make_ordinal;
use crate::model::contest::{Contest, TallyType};
use std::collections::BTreeMap;
use thiserror::Error;

/// The per-seat RCV round recursion gives up after this many rounds.
pub const RCV_ROUND_CAP: usize = 64;

/// Schema mismatch or round-limit failure while tallying one contest.
/// Fatal for that contest's tally.
#[derive(Error, Debug)]
pub enum TallyError {
    #[error("the following CVRs have structural errors: {errors:?}")]
    CvrErrors {
        errors: BTreeMap<String, Vec<String>>,
    },
    #[error("RCV rounds exceeded safety limit of {0} rounds")]
    RoundCap(usize),
    #[error("cannot tally an empty contest batch")]
    EmptyBatch,
}

/// One cast contest as extracted from a mainline commit: the commit
/// digest and the CVR payload it recorded.
#[derive(Debug, Clone)]
pub struct CastVoteRecord {
    pub digest: String,
    pub contest: Contest,
}

/// Tabulates one contest's worth of CVRs. The reference contest fixes
/// the schema the whole batch must match; the tally rules come from its
/// `tally` field unless overridden.
///
/// Results land in `winners`, `rcv_round`, `selection_counts`, and
/// `winner_order`; the human-readable account of the tally goes to
/// stdout as it happens.
#[derive(Debug)]
pub struct Tally {
    reference: Contest,
    reference_digest: String,
    /// Live per-choice counts. RCV rounds decrement last place
    /// finishers back to zero.
    pub selection_counts: BTreeMap<String, u64>,
    /// Total votes counted this seat; RCV rounds do not affect it.
    pub vote_count: u64,
    /// Ordered (name, count) rows per RCV round; round 0 doubles as the
    /// plurality result. The trailing entry is the in-progress round.
    pub rcv_round: Vec<Vec<(String, u64)>>,
    /// Choices no longer viable this seat: name to knockout round.
    pub obe_choices: BTreeMap<String, usize>,
    /// Winners of the current seat, in win order.
    pub winner_order: Vec<(String, u64)>,
    /// Winners across all seats so far; persists between seats.
    pub multiseat_winners: Vec<(String, u64)>,
    /// Final winner names across the whole contest.
    pub winners: Vec<String>,
    pub pairwise_matrix: BTreeMap<(String, String), u64>,
    /// Original voter rankings, restored at the start of every seat.
    selection_backup: BTreeMap<String, Vec<String>>,
    /// Set when the caller overrides the tally rule; the `tally` field
    /// is then exempt from batch validation.
    tally_overridden: bool,
}

impl Tally {
    /// Construct a tally from the reference CVR of a contest batch.
    pub fn new(reference: &CastVoteRecord) -> Result<Tally, TallyError> {
        let problems = reference.contest.schema_problems();
        if !problems.is_empty() {
            let mut errors = BTreeMap::new();
            errors.insert(reference.digest.clone(), problems);
            return Err(TallyError::CvrErrors { errors });
        }
        let choices = reference.contest.choice_names();
        let mut pairwise_matrix = BTreeMap::new();
        for a in &choices {
            for b in &choices {
                if a != b {
                    pairwise_matrix.insert((a.clone(), b.clone()), 0);
                }
            }
        }
        let mut tally = Tally {
            reference: reference.contest.clone(),
            reference_digest: reference.digest.clone(),
            selection_counts: BTreeMap::new(),
            vote_count: 0,
            rcv_round: Vec::new(),
            obe_choices: BTreeMap::new(),
            winner_order: Vec::new(),
            multiseat_winners: Vec::new(),
            winners: Vec::new(),
            pairwise_matrix,
            selection_backup: BTreeMap::new(),
            tally_overridden: false,
        };
        tally.multiseat_reset();
        Ok(tally)
    }

    pub fn reference(&self) -> &Contest {
        &self.reference
    }

    pub fn reference_digest(&self) -> &str {
        &self.reference_digest
    }

    /// The win threshold fraction. Sequential RCV is pegged to one half
    /// for every seat; plurality may configure it.
    fn effective_win_by(&self) -> f64 {
        match self.reference.tally {
            TallyType::Rcv => 0.5,
            _ => self.reference.win_by.unwrap_or(0.5),
        }
    }

    /// Reinitialize the per-seat state. Choices that already won a seat
    /// are dropped from the live counts; `multiseat_winners` persists.
    fn multiseat_reset(&mut self) {
        self.vote_count = 0;
        self.winner_order.clear();
        self.rcv_round = vec![Vec::new()];
        self.obe_choices.clear();
        self.selection_counts = self
            .reference
            .choice_names()
            .into_iter()
            .map(|name| (name, 0))
            .collect();
        for (winner, _) in &self.multiseat_winners {
            self.selection_counts.remove(winner);
        }
    }

    /// Verify and tally the supplied contest batch. `checks` holds
    /// optional CVR digests from voters wanting their receipt traced
    /// through the count.
    pub fn tallyho(
        &mut self,
        contest_batch: &mut [CastVoteRecord],
        checks: &[String],
        tally_override: Option<TallyType>,
    ) -> Result<(), TallyError> {
        if contest_batch.is_empty() {
            return Err(TallyError::EmptyBatch);
        }
        if let Some(tally_type) = tally_override {
            self.reference.tally = tally_type;
            self.tally_overridden = true;
        }

        for seat in 1..=(self.reference.open_positions as usize) {
            match self.reference.tally {
                TallyType::Plurality => println!("Running a plurality tally"),
                TallyType::Rcv => {
                    println!();
                    println!("RCV: initial tally, {} seat", make_ordinal(seat));
                }
                TallyType::Pwc => println!("Running a pairwise Condorcet tally"),
            }

            let total_votes = self.parse_and_tally_a_contest(contest_batch, checks)?;

            if self.reference.tally == TallyType::Pwc {
                let winners = condorcet::determine_condorcet_winners(
                    &self.reference,
                    &self.pairwise_matrix,
                );
                self.winners = winners;
                return Ok(());
            }

            // Order what has been counted so far.
            self.rcv_round[0] = sorted_counts(&self.selection_counts);
            self.rcv_round.push(Vec::new());

            if self.reference.tally == TallyType::Plurality {
                let winners = self.determine_plurality_winners();
                self.winner_order = self.rcv_round[0].clone();
                self.print_final_results(&winners);
                self.winners = winners;
                return Ok(());
            }

            // The rest of this block handles sequential RCV.
            let total_current_vote_count = self.total_vote_count(0);
            println!(
                "Total non-blank vote count: {} (out of {})",
                total_current_vote_count, total_votes
            );
            if self.reference.open_positions > 1 {
                println!(
                    "Running sequential RCV for the {} open seat",
                    make_ordinal(seat)
                );
            }

            self.check_for_winners(0, total_current_vote_count);
            if self.winner_order.is_empty() {
                // No majority in the initial round: eliminate and
                // recurse. All zero vote choices sort last already.
                let last_place_names = self.last_place_names(0);
                for name in &last_place_names {
                    self.obe_choices.insert(name.clone(), 0);
                }
                self.another_rcv_round(1, last_place_names, contest_batch, checks, seat)?;
                if self.winner_order.is_empty() {
                    self.settle_seat_without_majority();
                }
            }

            if self.multiseat_winners.len() >= self.reference.open_positions as usize
                || seat >= self.reference.open_positions as usize
            {
                let winners: Vec<String> = self
                    .multiseat_winners
                    .iter()
                    .map(|(name, _)| name.clone())
                    .collect();
                self.print_final_results(&winners);
                self.winners = winners;
                return Ok(());
            }

            self.print_seat_results(seat);
            self.multiseat_reset();
        }
        Ok(())
    }

    /// Parse and validate every CVR in the batch, tallying the first
    /// pass. Plurality and pairwise tallies complete in this single
    /// pass; RCV continues with elimination rounds afterwards.
    fn parse_and_tally_a_contest(
        &mut self,
        contest_batch: &mut [CastVoteRecord],
        checks: &[String],
    ) -> Result<u64, TallyError> {
        let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut vote_count = 0u64;
        for cvr in contest_batch.iter_mut() {
            vote_count += 1;
            let digest = cvr.digest.clone();
            let provenance = checks.iter().any(|check| check == &digest);
            if provenance {
                println!(
                    "INSPECTING: {} (contest={}) as vote {}",
                    digest, cvr.contest.contest_name, vote_count
                );
            }

            // Save or restore the voter's original ranking so each seat
            // restarts from it, minus the winners so far.
            match self.selection_backup.get(&digest) {
                Some(backup) => cvr.contest.selection = backup.clone(),
                None => {
                    self.selection_backup
                        .insert(digest.clone(), cvr.contest.selection.clone());
                }
            }

            for problem in cvr.contest.schema_problems() {
                errors.entry(digest.clone()).or_default().push(problem);
            }
            self.validate_against_reference(&cvr.contest, &digest, &mut errors);

            match self.reference.tally {
                TallyType::Plurality => {
                    self.tally_a_plurality_contest(&cvr.contest, provenance, vote_count, &digest)
                }
                TallyType::Rcv => {
                    self.remove_previous_winners(&mut cvr.contest, provenance, &digest);
                    self.tally_a_rcv_contest(&cvr.contest, provenance, vote_count, &digest)
                }
                TallyType::Pwc => condorcet::tally_a_pwc_contest(
                    &self.reference,
                    &mut self.pairwise_matrix,
                    &cvr.contest,
                    provenance,
                    vote_count,
                    &digest,
                ),
            }
        }

        if !errors.is_empty() {
            return Err(TallyError::CvrErrors { errors });
        }
        Ok(vote_count)
    }

    /// Every CVR must match the reference contest on these fields;
    /// `win_by` is allowed to vary.
    fn validate_against_reference(
        &self,
        contest: &Contest,
        digest: &str,
        errors: &mut BTreeMap<String, Vec<String>>,
    ) {
        let mut mismatch = |field: &str, matches: bool, reference: String, found: String| {
            if !matches {
                errors
                    .entry(digest.to_string())
                    .or_default()
                    .push(format!(
                        "{} field does not match: {} != {}",
                        field, reference, found
                    ));
            }
        };
        mismatch(
            "choices",
            contest.choices == self.reference.choices,
            format!("{:?}", self.reference.choice_names()),
            format!("{:?}", contest.choice_names()),
        );
        mismatch(
            "tally",
            self.tally_overridden || contest.tally == self.reference.tally,
            self.reference.tally.as_str().to_string(),
            contest.tally.as_str().to_string(),
        );
        mismatch(
            "max_selections",
            contest.max_selections == self.reference.max_selections,
            format!("{:?}", self.reference.max_selections),
            format!("{:?}", contest.max_selections),
        );
        mismatch(
            "ggo",
            contest.ggo == self.reference.ggo,
            format!("{:?}", self.reference.ggo),
            format!("{:?}", contest.ggo),
        );
        mismatch(
            "uid",
            contest.uid == self.reference.uid,
            format!("{:?}", self.reference.uid),
            format!("{:?}", contest.uid),
        );
        mismatch(
            "contest_name",
            contest.contest_name == self.reference.contest_name,
            self.reference.contest_name.clone(),
            contest.contest_name.clone(),
        );
        mismatch(
            "contest_type",
            contest.contest_type == self.reference.contest_type,
            format!("{:?}", self.reference.contest_type),
            format!("{:?}", contest.contest_type),
        );
        mismatch(
            "election_upstream_remote",
            contest.election_upstream_remote == self.reference.election_upstream_remote,
            format!("{:?}", self.reference.election_upstream_remote),
            format!("{:?}", contest.election_upstream_remote),
        );
    }

    fn tally_a_plurality_contest(
        &mut self,
        contest: &Contest,
        provenance: bool,
        vote_count: u64,
        digest: &str,
    ) {
        for seat in 0..self.reference.open_positions as usize {
            if let Some(selection) = contest.selection.get(seat) {
                if let Some(count) = self.selection_counts.get_mut(selection) {
                    *count += 1;
                }
                self.vote_count += 1;
                if provenance {
                    println!(
                        "Counted vote {} ({}) seat {} selection={}",
                        vote_count,
                        digest,
                        seat + 1,
                        selection
                    );
                } else {
                    crate::log_debug!(
                        "counted vote {} ({}) seat {} selection={}",
                        vote_count,
                        digest,
                        seat + 1,
                        selection
                    );
                }
            } else if provenance {
                println!(
                    "Counted vote {} ({}) seat {} as no vote - BLANK",
                    vote_count,
                    digest,
                    seat + 1
                );
            }
        }
    }

    fn tally_a_rcv_contest(
        &mut self,
        contest: &Contest,
        provenance: bool,
        vote_count: u64,
        digest: &str,
    ) {
        // The voter can still leave a RCV contest blank.
        if let Some(selection) = contest.selection.first() {
            if let Some(count) = self.selection_counts.get_mut(selection) {
                *count += 1;
            }
            self.vote_count += 1;
            if provenance {
                println!("Counted vote {} ({}) for {}", vote_count, digest, selection);
            } else {
                crate::log_debug!("counted vote {} ({}) for {}", vote_count, digest, selection);
            }
        } else if provenance {
            println!("Counted vote {} ({}) as no vote - BLANK", vote_count, digest);
        }
    }

    /// Strip every choice that already won an earlier seat from the
    /// voter's ranking.
    fn remove_previous_winners(&self, contest: &mut Contest, provenance: bool, digest: &str) {
        let winners: Vec<&String> = self
            .multiseat_winners
            .iter()
            .map(|(name, _)| name)
            .collect();
        let before = contest.selection.len();
        contest
            .selection
            .retain(|selection| !winners.contains(&selection));
        if provenance && contest.selection.len() != before {
            println!(
                "RCV: {} (contest={}) note - a ranked choice is already a winner",
                digest, contest.contest_name
            );
        }
    }

    /// The denominator for the win-by check: all current candidate
    /// counts summed, so blank and exhausted ballots do not dilute the
    /// threshold.
    fn total_vote_count(&self, round: usize) -> u64 {
        self.rcv_round[round]
            .iter()
            .map(|(name, _)| self.selection_counts.get(name).copied().unwrap_or(0))
            .sum()
    }

    /// Append every choice whose fraction of the current vote strictly
    /// exceeds the win threshold. The test is `>` and not `>=`.
    fn check_for_winners(&mut self, round: usize, total_current_vote_count: u64) {
        if total_current_vote_count == 0 {
            return;
        }
        let win_by = self.effective_win_by();
        let names: Vec<String> = self.rcv_round[round]
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            let count = self.selection_counts.get(&name).copied().unwrap_or(0);
            if count as f64 / total_current_vote_count as f64 > win_by {
                self.winner_order.push((name.clone(), count));
                self.multiseat_winners.push((name, count));
            }
        }
    }

    /// The set of remaining choices tied at the minimum count, walking
    /// the ordered round from the bottom. Already-eliminated choices are
    /// skipped.
    fn last_place_names(&self, round: usize) -> Vec<String> {
        for result in &self.rcv_round[round] {
            println!("  {}: {}", result.0, result.1);
        }
        let working: Vec<&(String, u64)> = self.rcv_round[round]
            .iter()
            .filter(|(name, _)| !self.obe_choices.contains_key(name))
            .collect();
        let mut last_place_names = Vec::new();
        let mut previous_count = 0;
        for (offset, (name, count)) in working.iter().rev().enumerate() {
            if offset == 0 || *count == previous_count {
                last_place_names.push(name.clone());
                previous_count = *count;
            } else {
                break;
            }
        }
        last_place_names
    }

    /// Checks run before another RCV round. `Ok(true)` means proceed;
    /// `Ok(false)` means the seat is settled as far as it can be.
    fn next_rcv_round_precheck(
        &self,
        last_place_names: &[String],
        this_round: usize,
    ) -> Result<bool, TallyError> {
        let non_zero_count_choices = self.rcv_round[this_round - 1]
            .iter()
            .filter(|(_, count)| *count != 0)
            .count();

        if last_place_names.is_empty() {
            println!("No more choices/candidates to recast - no more RCV rounds");
            return Ok(false);
        }
        if this_round > RCV_ROUND_CAP {
            return Err(TallyError::RoundCap(RCV_ROUND_CAP));
        }
        if this_round >= self.rcv_round[0].len() {
            println!("There are no more RCV rounds");
            return Ok(false);
        }
        if non_zero_count_choices == 0 {
            println!("There are no votes for any choice");
            return Ok(false);
        }
        if non_zero_count_choices <= 2 {
            println!(
                "There is only {} remaining choices - halting more RCV rounds",
                non_zero_count_choices
            );
            return Ok(false);
        }
        if non_zero_count_choices == last_place_names.len() {
            println!(
                "This contest ends in a {} way tie",
                non_zero_count_choices
            );
            return Ok(false);
        }
        if last_place_names.len() >= 2 {
            crate::log_warn!(
                "There is a last place {} way tie.",
                last_place_names.len()
            );
            // A tie on losing that still leaves choices standing: let
            // all the tied losers go.
            return Ok(non_zero_count_choices > last_place_names.len());
        }
        Ok(true)
    }

    /// Strip the leading run of eliminated choices off a ranking.
    fn remove_obe_selections(&self, contest: &mut Contest) {
        while let Some(first) = contest.selection.first() {
            if self.obe_choices.contains_key(first) {
                contest.selection.remove(0);
            } else {
                break;
            }
        }
    }

    /// Recast every CVR whose current leading selection lost this round.
    /// If the ranking has no next choice the vote drops.
    fn recast_votes(
        &mut self,
        last_place_names: &[String],
        contest_batch: &mut [CastVoteRecord],
        checks: &[String],
    ) -> u64 {
        let mut total_votes = 0u64;
        for cvr in contest_batch.iter_mut() {
            total_votes += 1;
            let digest = cvr.digest.clone();
            let provenance = checks.iter().any(|check| check == &digest);
            if cvr.contest.selection.is_empty() {
                if provenance {
                    println!("RCV: vote {} ({}) no vote - BLANK", total_votes, digest);
                }
                continue;
            }
            for last_place_name in last_place_names {
                let leading = match cvr.contest.selection.first() {
                    Some(name) => name.clone(),
                    None => break,
                };
                if leading != *last_place_name {
                    continue;
                }
                // The eliminated set already contains this round's
                // losers, so this pops the leading selection and any
                // now-leading name that is also out.
                self.remove_obe_selections(&mut cvr.contest);
                if let Some(count) = self.selection_counts.get_mut(last_place_name) {
                    *count = count.saturating_sub(1);
                }
                match cvr.contest.selection.first() {
                    Some(new_selection) => {
                        let new_selection = new_selection.clone();
                        if let Some(count) = self.selection_counts.get_mut(&new_selection) {
                            *count += 1;
                        }
                        if provenance {
                            println!(
                                "RCV: vote {} ({}) last place pop and count: {} -> {}",
                                total_votes, digest, last_place_name, new_selection
                            );
                        } else {
                            crate::log_debug!(
                                "RCV: vote {} ({}) last place pop and count: {} -> {}",
                                total_votes,
                                digest,
                                last_place_name,
                                new_selection
                            );
                        }
                    }
                    None => {
                        if provenance {
                            println!(
                                "RCV: vote {} ({}) last place pop and drop ({} -> BLANK)",
                                total_votes, digest, last_place_name
                            );
                        } else {
                            crate::log_debug!(
                                "RCV: vote {} ({}) last place pop and drop ({} -> BLANK)",
                                total_votes,
                                digest,
                                last_place_name
                            );
                        }
                    }
                }
            }
        }
        total_votes
    }

    /// Rewrite the tail of the round with the losers in knockout order,
    /// most recently eliminated first, so the reported ordering is
    /// stable across rounds.
    fn restore_proper_rcv_round_ordering(&mut self, this_round: usize) {
        let mut loser_order: Vec<(String, usize)> = self
            .obe_choices
            .iter()
            .map(|(name, round)| (name.clone(), *round))
            .collect();
        loser_order.sort_by(|a, b| b.1.cmp(&a.1));
        if loser_order.len() > 1 {
            let len = self.rcv_round[this_round].len();
            for (index, (name, _)) in loser_order.iter().rev().enumerate() {
                self.rcv_round[this_round][len - 1 - index] = (name.clone(), 0);
            }
        }
    }

    /// Run one more RCV elimination round, recursing until the seat is
    /// won or settles. Bounded by `RCV_ROUND_CAP`.
    fn another_rcv_round(
        &mut self,
        this_round: usize,
        last_place_names: Vec<String>,
        contest_batch: &mut [CastVoteRecord],
        checks: &[String],
        seat: usize,
    ) -> Result<(), TallyError> {
        println!();
        println!("RCV: round {}, {} seat", this_round, make_ordinal(seat));
        if !self.next_rcv_round_precheck(&last_place_names, this_round)? {
            return Ok(());
        }

        let total_votes = self.recast_votes(&last_place_names, contest_batch, checks);
        self.rcv_round[this_round] = sorted_counts(&self.selection_counts);
        self.restore_proper_rcv_round_ordering(this_round);
        self.rcv_round.push(Vec::new());

        let total_current_vote_count = self.total_vote_count(this_round);
        println!(
            "Total non-blank vote count: {} (out of {})",
            total_current_vote_count, total_votes
        );
        self.check_for_winners(this_round, total_current_vote_count);
        if !self.winner_order.is_empty() {
            return Ok(());
        }

        let next_last_place = self.last_place_names(this_round);
        for name in &next_last_place {
            self.obe_choices.insert(name.clone(), this_round);
        }
        self.another_rcv_round(this_round + 1, next_last_place, contest_batch, checks, seat)
    }

    /// The no-majority terminal states: when the rounds halt with
    /// candidates still standing, the plurality of the remainder fills
    /// the seat; a tie at the top seats all the tied leaders. With no
    /// votes left at all the seat goes unfilled.
    fn settle_seat_without_majority(&mut self) {
        // Choices knocked out in completed rounds already sit at zero;
        // a halt can also strand live counts on choices marked for an
        // elimination that never ran, and those still compete here.
        let last_round = &self.rcv_round[self.rcv_round.len() - 2];
        let top = last_round.iter().map(|(_, count)| *count).max().unwrap_or(0);
        if top == 0 {
            println!("Seat left unfilled: no votes remain for any choice");
            return;
        }
        let leaders: Vec<(String, u64)> = last_round
            .iter()
            .filter(|(_, count)| *count == top)
            .cloned()
            .collect();
        if leaders.len() > 1 {
            println!(
                "No majority winner; the remaining leaders are tied: {}",
                leaders
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        } else {
            println!(
                "No majority winner; plurality of the remainder wins: {}",
                leaders[0].0
            );
        }
        for leader in leaders {
            self.winner_order.push(leader.clone());
            self.multiseat_winners.push(leader);
        }
    }

    /// Walk the sorted plurality order filling the open seats; all
    /// entries tied at the boundary count are included.
    fn determine_plurality_winners(&self) -> Vec<String> {
        let round = &self.rcv_round[0];
        let open_positions = self.reference.open_positions as usize;
        let mut winners: Vec<String> = Vec::new();
        let mut idx = 0;
        while winners.len() < open_positions && idx < round.len() {
            let current_count = round[idx].1;
            let tied: Vec<String> = round
                .iter()
                .filter(|(_, count)| *count == current_count)
                .map(|(name, _)| name.clone())
                .collect();
            idx += tied.len();
            if tied.len() > 1 {
                println!(
                    "There is a tie: {:?} for the {} seat",
                    tied,
                    make_ordinal(idx)
                );
            }
            winners.extend(tied);
        }
        winners
    }

    fn print_seat_results(&self, seat: usize) {
        println!(
            "Results for the {} open seat of contest {} (uid={}):",
            make_ordinal(seat),
            self.reference.contest_name,
            self.reference.uid.as_deref().unwrap_or("")
        );
        for (name, count) in &self.rcv_round[self.rcv_round.len() - 2] {
            println!("  {}: {}", name, count);
        }
        println!(
            "Removing the winner(s), {}, from consideration for the next open seat \
             (seat {} of {})",
            self.winner_order
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            seat + 1,
            self.reference.open_positions
        );
        println!("Running next open seat tally ...");
    }

    fn print_final_results(&self, winners: &[String]) {
        println!(
            "Final {} round results for contest {} (uid={}):",
            self.reference.tally.as_str(),
            self.reference.contest_name,
            self.reference.uid.as_deref().unwrap_or("")
        );
        // The last full round is a complete count across all choices;
        // the winner list alone is partial.
        for (name, count) in &self.rcv_round[self.rcv_round.len() - 2] {
            println!("  {}: {}", name, count);
        }
        println!("Winner(s): {}", winners.join(", "));
    }
}

/// Order live counts descending; equal counts keep name order.
fn sorted_counts(selection_counts: &BTreeMap<String, u64>) -> Vec<(String, u64)> {
    let mut counts: Vec<(String, u64)> = selection_counts
        .iter()
        .map(|(name, count)| (name.clone(), *count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::contest::Contest;

    fn contest(tally: &str, choices: &[&str], open_positions: u32) -> Contest {
        let mut contest: Contest = serde_json::from_value(serde_json::json!({
            "choices": choices,
            "tally": tally,
            "open_positions": open_positions,
            "contest_type": "candidate",
            "contest_name": "test contest",
            "ggo": ".",
            "uid": "0000"
        }))
        .unwrap();
        contest.apply_defaults();
        contest
    }

    fn batch(reference: &Contest, selections: &[&[&str]]) -> Vec<CastVoteRecord> {
        selections
            .iter()
            .enumerate()
            .map(|(i, selection)| {
                let mut contest = reference.clone();
                contest.selection = selection.iter().map(|s| s.to_string()).collect();
                CastVoteRecord {
                    digest: format!("digest-{:04}", i),
                    contest,
                }
            })
            .collect()
    }

    fn run(reference: Contest, selections: &[&[&str]]) -> Result<Tally, TallyError> {
        let mut cvrs = batch(&reference, selections);
        let mut tally = Tally::new(&cvrs[0])?;
        tally.tallyho(&mut cvrs, &[], None)?;
        Ok(tally)
    }

    #[test]
    fn test_plurality_single_seat() {
        let tally = run(
            contest("plurality", &["A", "B", "C"], 1),
            &[&["A"], &["B"], &["A"]],
        )
        .unwrap();
        assert_eq!(tally.winners, vec!["A"]);
        assert_eq!(tally.selection_counts.get("A"), Some(&2));
        assert_eq!(tally.selection_counts.get("B"), Some(&1));
        assert_eq!(tally.selection_counts.get("C"), Some(&0));
        assert_eq!(tally.vote_count, 3);
    }

    #[test]
    fn test_plurality_tie_includes_the_boundary() {
        let tally = run(contest("plurality", &["A", "B"], 1), &[&["A"], &["B"]]).unwrap();
        let mut winners = tally.winners.clone();
        winners.sort();
        assert_eq!(winners, vec!["A", "B"]);
    }

    #[test]
    fn test_plurality_counts_blank_positions() {
        // Two seats; a ballot with one selection leaves the second
        // position blank.
        let tally = run(
            contest("plurality", &["A", "B", "C"], 2),
            &[&["A", "B"], &["A"], &["C", "B"]],
        )
        .unwrap();
        assert_eq!(tally.selection_counts.get("A"), Some(&2));
        assert_eq!(tally.selection_counts.get("B"), Some(&2));
        assert_eq!(tally.selection_counts.get("C"), Some(&1));
        assert_eq!(tally.vote_count, 5);
        let mut winners = tally.winners.clone();
        winners.sort();
        assert_eq!(winners, vec!["A", "B"]);
    }

    #[test]
    fn test_sequential_rcv_single_seat() {
        let tally = run(
            contest("rcv", &["A", "B", "C"], 1),
            &[&["A", "B"], &["B", "C"], &["C", "A"], &["C", "B"], &["B", "A"]],
        )
        .unwrap();
        // Round 0: A=1, B=2, C=2. A eliminated; its vote recasts to B.
        // Round 1: B=3 of 5 > 50%.
        assert_eq!(tally.winners, vec!["B"]);
        assert_eq!(tally.rcv_round[0][0], ("B".to_string(), 2));
        assert_eq!(tally.rcv_round[1][0], ("B".to_string(), 3));
        assert_eq!(tally.obe_choices.get("A"), Some(&0));
    }

    #[test]
    fn test_rcv_round_totals_never_increase() {
        let reference = contest("rcv", &["A", "B", "C", "D"], 1);
        let mut cvrs = batch(
            &reference,
            &[
                &["A", "B", "C"],
                &["B"],
                &["C", "D"],
                &["D"],
                &["A", "C"],
                &["B", "D"],
                &["C"],
            ],
        );
        let mut tally = Tally::new(&cvrs[0]).unwrap();
        tally.tallyho(&mut cvrs, &[], None).unwrap();
        let totals: Vec<u64> = tally
            .rcv_round
            .iter()
            .filter(|round| !round.is_empty())
            .map(|round| round.iter().map(|(_, count)| count).sum())
            .collect();
        for pair in totals.windows(2) {
            assert!(pair[1] <= pair[0], "round totals increased: {:?}", totals);
        }
    }

    #[test]
    fn test_sequential_rcv_two_seats() {
        let tally = run(
            contest("rcv", &["A", "B", "C"], 2),
            &[&["A", "B"], &["A", "C"], &["B", "A"]],
        )
        .unwrap();
        // Seat 1: A has 2 of 3. Seat 2 restarts from the original
        // rankings minus A: B has 2 of 3.
        assert_eq!(tally.winners, vec!["A", "B"]);
        assert_eq!(tally.multiseat_winners.len(), 2);
    }

    #[test]
    fn test_rcv_blank_ballots_stay_out_of_the_denominator() {
        let tally = run(
            contest("rcv", &["A", "B"], 1),
            &[&["A"], &["A"], &[], &["B"]],
        )
        .unwrap();
        // 3 non-blank votes; A has 2/3 > 50%.
        assert_eq!(tally.winners, vec!["A"]);
    }

    #[test]
    fn test_rcv_round_cap() {
        // 70 choices with strictly distinct single-ranked counts: every
        // round eliminates exactly one choice and recasts nothing, so
        // the rounds outlast the safety limit.
        let choices: Vec<String> = (0..70).map(|i| format!("c{:02}", i)).collect();
        let choice_refs: Vec<&str> = choices.iter().map(|s| s.as_str()).collect();
        let reference = contest("rcv", &choice_refs, 1);
        let mut selections: Vec<Vec<&str>> = Vec::new();
        for (i, choice) in choice_refs.iter().enumerate() {
            for _ in 0..=i {
                selections.push(vec![*choice]);
            }
        }
        let selection_slices: Vec<&[&str]> =
            selections.iter().map(|s| s.as_slice()).collect();
        let mut cvrs = batch(&reference, &selection_slices);
        let mut tally = Tally::new(&cvrs[0]).unwrap();
        match tally.tallyho(&mut cvrs, &[], None) {
            Err(TallyError::RoundCap(cap)) => assert_eq!(cap, RCV_ROUND_CAP),
            other => panic!("expected RoundCap, got {:?}", other),
        }
    }

    #[test]
    fn test_last_place_tie_recasts_and_majority_emerges() {
        // Round 0: A=3, B=2, C=2 of 7; nobody above 50%. B and C tie at
        // last place and are both eliminated with nothing to recast, so
        // A holds all the remaining votes in round 1.
        let tally = run(
            contest("rcv", &["A", "B", "C"], 1),
            &[&["A"], &["A"], &["A"], &["B"], &["B"], &["C"], &["C"]],
        )
        .unwrap();
        assert_eq!(tally.winners, vec!["A"]);
    }

    #[test]
    fn test_all_way_tie_seats_the_tied_leaders() {
        // Every choice holds two single-ranked votes; the rounds halt on
        // the all-way tie and the tied leaders share the seat.
        let tally = run(
            contest("rcv", &["A", "B", "C"], 1),
            &[&["A"], &["A"], &["B"], &["B"], &["C"], &["C"]],
        )
        .unwrap();
        let mut winners = tally.winners.clone();
        winners.sort();
        assert_eq!(winners, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_two_way_remainder_tie_seats_both() {
        // A and B deadlock at three votes each once C and D are out; the
        // halt settles the seat with both tied leaders.
        let tally = run(
            contest("rcv", &["A", "B", "C", "D"], 1),
            &[
                &["A"],
                &["A"],
                &["A"],
                &["B"],
                &["B"],
                &["B"],
                &["C"],
                &["D"],
            ],
        )
        .unwrap();
        let mut winners = tally.winners.clone();
        winners.sort();
        assert_eq!(winners, vec!["A", "B"]);
    }

    #[test]
    fn test_batch_validation_aggregates_per_digest() {
        let reference = contest("rcv", &["A", "B"], 1);
        let mut cvrs = batch(&reference, &[&["A"], &["B"], &["A"]]);
        cvrs[1].contest.contest_name = "wrong name".to_string();
        cvrs[2].contest.uid = Some("9999".to_string());
        cvrs[2].contest.ggo = Some("GGOs/elsewhere".to_string());
        let mut tally = Tally::new(&cvrs[0]).unwrap();
        match tally.tallyho(&mut cvrs, &[], None) {
            Err(TallyError::CvrErrors { errors }) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors["digest-0001"].len(), 1);
                assert!(errors["digest-0001"][0].contains("contest_name"));
                assert_eq!(errors["digest-0002"].len(), 2);
            }
            other => panic!("expected CvrErrors, got {:?}", other),
        }
    }

    #[test]
    fn test_tally_override_replaces_the_rule() {
        let reference = contest("rcv", &["A", "B"], 1);
        let mut cvrs = batch(&reference, &[&["A", "B"], &["B", "A"], &["A"]]);
        let mut tally = Tally::new(&cvrs[0]).unwrap();
        tally
            .tallyho(&mut cvrs, &[], Some(TallyType::Plurality))
            .unwrap();
        assert_eq!(tally.winners, vec!["A"]);
    }
}
