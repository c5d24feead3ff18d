//! Seeder rank progression rules.

use db::models::{referral_member::SeederRank, referral_setting::RankRequirement};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RankDecision {
    Stay,
    Upgrade { to: SeederRank, requirement: RankRequirement },
}

/// How far a member is from the next rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RankProgress {
    pub current: SeederRank,
    pub next: Option<SeederRank>,
    pub f1_count: u32,
    pub f1_required: u32,
    pub qualified_f1_count: u32,
    pub qualified_f1_required: u32,
}

/// Evaluate a single step up the ladder. A member climbing several ranks
/// needs one call per rank.
pub fn evaluate(
    current: SeederRank,
    f1_count: u32,
    f1_ranks: &[SeederRank],
    ladder: &[RankRequirement],
) -> RankDecision {
    let Some(next) = current.next() else {
        return RankDecision::Stay;
    };
    let Some(requirement) = ladder.iter().find(|r| r.rank == next) else {
        return RankDecision::Stay;
    };

    if meets(requirement, f1_count, f1_ranks) {
        RankDecision::Upgrade {
            to: next,
            requirement: requirement.clone(),
        }
    } else {
        RankDecision::Stay
    }
}

pub fn progress(
    current: SeederRank,
    f1_count: u32,
    f1_ranks: &[SeederRank],
    ladder: &[RankRequirement],
) -> RankProgress {
    let next = current.next();
    let requirement = next.and_then(|n| ladder.iter().find(|r| r.rank == n));

    RankProgress {
        current,
        next,
        f1_count,
        f1_required: requirement.map(|r| r.f1_required).unwrap_or(0),
        qualified_f1_count: requirement
            .map(|r| qualified_f1_count(r, f1_ranks))
            .unwrap_or(0),
        qualified_f1_required: requirement
            .filter(|r| r.f1_rank_required.is_some())
            .map(|r| r.f1_rank_count_required)
            .unwrap_or(0),
    }
}

fn meets(requirement: &RankRequirement, f1_count: u32, f1_ranks: &[SeederRank]) -> bool {
    if f1_count < requirement.f1_required {
        return false;
    }
    match requirement.f1_rank_required {
        None => true,
        Some(_) => qualified_f1_count(requirement, f1_ranks) >= requirement.f1_rank_count_required,
    }
}

fn qualified_f1_count(requirement: &RankRequirement, f1_ranks: &[SeederRank]) -> u32 {
    match requirement.f1_rank_required {
        Some(min_rank) => f1_ranks.iter().filter(|r| **r >= min_rank).count() as u32,
        None => 0,
    }
}
