//! Turning battle results into points.
//!
//! Every pair of active teams fights for the same share of the achievable points: each team's
//! part of the share is proportional to its battle score in the role being scored. Teams that
//! failed to build get nothing, and every active team is awarded the full share it would have
//! fought an excluded team for.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt::Display,
};

use tracing::{instrument, warn};

use crate::{battle::Battle, sandbox::Role, team::Matchup};

/// Everything a finished (or interrupted) match produced.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Teams whose programs built, in matchup order.
    pub active: Vec<String>,
    /// Teams that failed to build, with the reason.
    pub excluded: BTreeMap<String, String>,
    /// Teams whose build was interrupted by a cancellation. They play no battle and get no
    /// points, nor do the others get any for them.
    pub cancelled: BTreeSet<String>,
    /// Battle of every matchup that completed.
    pub battles: HashMap<Matchup, Battle>,
    /// Matchups whose battle failed internally, with the reason.
    pub failed_battles: BTreeMap<Matchup, String>,
    /// True if the match was cancelled before every battle ran.
    pub interrupted: bool,
}

impl MatchResult {
    /// Battle of `matchup`, if it completed.
    pub fn battle(&self, matchup: &Matchup) -> Option<&Battle> {
        self.battles.get(matchup)
    }
}

impl Display for MatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut battles = self.battles.iter().collect::<Vec<_>>();
        battles.sort_by(|a, b| a.0.cmp(b.0));
        for (matchup, battle) in battles {
            writeln!(f, "{matchup}: {battle}")?;
        }
        for (matchup, reason) in &self.failed_battles {
            writeln!(f, "{matchup}: failed ({reason})")?;
        }
        for (team, reason) in &self.excluded {
            writeln!(f, "{team}: excluded ({reason})")?;
        }
        for team in &self.cancelled {
            writeln!(f, "{team}: build cancelled")?;
        }
        if self.interrupted {
            writeln!(f, "match interrupted")?;
        }
        Ok(())
    }
}

/// Points of every team.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointsTable(BTreeMap<String, f64>);

impl PointsTable {
    /// Points of `team`.
    pub fn get(&self, team: &str) -> Option<f64> {
        self.0.get(team).copied()
    }

    /// Sum of every team's points.
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Teams and their points, by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, points)| (name.as_str(), *points))
    }

    /// Teams sorted from most to fewest points.
    pub fn ranking(&self) -> Vec<(&str, f64)> {
        let mut ranking = self.iter().collect::<Vec<_>>();
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranking
    }

    /// Number of teams.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no team got points.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for PointsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (team, points) in self.ranking() {
            writeln!(f, "{team}: {points:.1}")?;
        }
        Ok(())
    }
}

fn round_one_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Distribute `achievable_points` according to the battles of `result`.
///
/// `scoring_role` is the role the battle score is credited to, see
/// [`BattleConfig::scoring_role`](crate::battle::BattleConfig::scoring_role).
#[instrument(skip(result))]
pub fn calculate_points(result: &MatchResult, achievable_points: f64, scoring_role: Role) -> PointsTable {
    let active = &result.active;
    match active.len() {
        0 => return PointsTable::default(),
        1 => {
            let mut points = result
                .excluded
                .keys()
                .map(|name| (name.clone(), 0.0))
                .collect::<BTreeMap<_, _>>();
            points.insert(active[0].clone(), achievable_points);
            return PointsTable(points);
        }
        _ => {}
    }

    let mut points = active
        .iter()
        .chain(result.excluded.keys())
        .map(|name| (name.clone(), 0.0))
        .collect::<BTreeMap<_, f64>>();
    let per_pair = round_one_decimal(achievable_points / (active.len() - 1) as f64);

    for (i, home) in active.iter().enumerate() {
        for away in &active[i + 1..] {
            // battle in which `home` plays the scored role, and its mirror
            let home_matchup = match scoring_role {
                Role::Generator => Matchup::new(home.clone(), away.clone()),
                Role::Solver => Matchup::new(away.clone(), home.clone()),
            };
            let away_matchup = home_matchup.reversed();
            let (Some(home_battle), Some(away_battle)) = (
                result.battles.get(&home_matchup),
                result.battles.get(&away_matchup),
            ) else {
                warn!("no result between {home} and {away}, skipping the pair");
                continue;
            };

            let (home_score, away_score) = (home_battle.score(), away_battle.score());
            let total = home_score + away_score;
            let (home_ratio, away_ratio) = if total == 0.0 {
                (0.5, 0.5)
            } else {
                (home_score / total, away_score / total)
            };
            *points.entry(home.clone()).or_default() += round_one_decimal(per_pair * home_ratio);
            *points.entry(away.clone()).or_default() += round_one_decimal(per_pair * away_ratio);
        }
    }

    let excluded_credit = round_one_decimal(per_pair * result.excluded.len() as f64);
    for name in active {
        *points.entry(name.clone()).or_default() += excluded_credit;
    }

    PointsTable(points)
}
