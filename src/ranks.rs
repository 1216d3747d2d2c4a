use std::fmt;
use std::str::FromStr;

/// Clan ranks in promotion order. `Legend` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Mediator,
    Sage,
    Destroyer,
    Unholy,
    Legend,
}

impl Rank {
    pub const ALL: [Rank; 5] = [
        Rank::Mediator,
        Rank::Sage,
        Rank::Destroyer,
        Rank::Unholy,
        Rank::Legend,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Rank::Mediator => "Mediator",
            Rank::Sage => "Sage",
            Rank::Destroyer => "Destroyer",
            Rank::Unholy => "Unholy",
            Rank::Legend => "Legend",
        }
    }

    /// The only legal transition out of this rank, if any.
    pub fn next(self) -> Option<Rank> {
        let idx = Rank::ALL.iter().position(|r| *r == self)?;
        Rank::ALL.get(idx + 1).copied()
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRank(pub String);

impl fmt::Display for UnknownRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown rank '{}'", self.0)
    }
}

impl FromStr for Rank {
    type Err = UnknownRank;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Rank::ALL
            .iter()
            .copied()
            .find(|r| r.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownRank(trimmed.to_string()))
    }
}

/// Gate for leaving a rank. Counter rules are keyed by the target rank,
/// time rules by the current rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionRule {
    /// Career counter must reach this value to enter the target rank.
    Counter(u32),
    /// Days since enrollment required while holding the current rank.
    DaysEnrolled(i64),
}

/// Promotion rules for every non-terminal rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankLadder {
    pub sage_threshold: u32,
    pub destroyer_threshold: u32,
    pub unholy_threshold: u32,
    pub mediator_days: i64,
}

impl Default for RankLadder {
    fn default() -> Self {
        Self {
            sage_threshold: 5,
            destroyer_threshold: 10,
            unholy_threshold: 15,
            mediator_days: 30,
        }
    }
}

impl RankLadder {
    /// Rule governing the move out of `current`. `None` for the terminal rank.
    pub fn rule_for(&self, current: Rank) -> Option<PromotionRule> {
        match current {
            Rank::Mediator => Some(PromotionRule::DaysEnrolled(self.mediator_days)),
            Rank::Legend => None,
            other => other
                .next()
                .and_then(|target| self.counter_threshold(target))
                .map(PromotionRule::Counter),
        }
    }

    /// Counter needed to enter `target`, if `target` is counter-gated.
    pub fn counter_threshold(&self, target: Rank) -> Option<u32> {
        match target {
            Rank::Sage => Some(self.sage_threshold),
            Rank::Destroyer => Some(self.destroyer_threshold),
            Rank::Unholy => Some(self.unholy_threshold),
            // Legend has no configured threshold; the counter rule treats it as 0.
            Rank::Legend => Some(0),
            Rank::Mediator => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_is_a_single_chain() {
        assert_eq!(Rank::Mediator.next(), Some(Rank::Sage));
        assert_eq!(Rank::Sage.next(), Some(Rank::Destroyer));
        assert_eq!(Rank::Destroyer.next(), Some(Rank::Unholy));
        assert_eq!(Rank::Unholy.next(), Some(Rank::Legend));
        assert_eq!(Rank::Legend.next(), None);
        assert!(Rank::Legend.is_terminal());
        assert!(!Rank::Mediator.is_terminal());
    }

    #[test]
    fn parses_rank_names_case_insensitively() {
        assert_eq!(" sage ".parse::<Rank>(), Ok(Rank::Sage));
        assert_eq!("LEGEND".parse::<Rank>(), Ok(Rank::Legend));
        assert!("Recruit".parse::<Rank>().is_err());
    }

    #[test]
    fn mediator_is_time_gated_and_others_counter_gated() {
        let ladder = RankLadder::default();
        assert_eq!(ladder.rule_for(Rank::Mediator), Some(PromotionRule::DaysEnrolled(30)));
        assert_eq!(ladder.rule_for(Rank::Sage), Some(PromotionRule::Counter(10)));
        assert_eq!(ladder.rule_for(Rank::Destroyer), Some(PromotionRule::Counter(15)));
        assert_eq!(ladder.rule_for(Rank::Unholy), Some(PromotionRule::Counter(0)));
        assert_eq!(ladder.rule_for(Rank::Legend), None);
    }
}
