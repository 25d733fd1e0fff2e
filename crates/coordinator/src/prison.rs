//! Record of inputs that disrupted rounds.

use std::collections::HashMap;

use bitcoin::OutPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use wabisabi_primitives::ids::RoundId;

/// How severely an input is punished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Punishment {
    /// The input misbehaved once in a way that may be accidental.
    Noted,

    /// The input may not register again.
    Banned,
}

/// A punished input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inmate {
    /// The punished input.
    pub outpoint: OutPoint,

    /// Current punishment.
    pub punishment: Punishment,

    /// When the current punishment started.
    pub since: DateTime<Utc>,

    /// The round the input last disrupted.
    pub last_disruptive_round: RoundId,
}

/// Punished inputs by outpoint. Entries are never released here; retention is up to the operator.
#[derive(Debug, Default)]
pub struct Prison {
    inmates: HashMap<OutPoint, Inmate>,
}

impl Prison {
    /// Creates an empty prison.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notes `outpoint` for disrupting `round_id`. An input noted twice is banned.
    pub fn note(&mut self, outpoint: OutPoint, round_id: RoundId) -> Punishment {
        let punishment = match self.inmates.get(&outpoint) {
            Some(_) => Punishment::Banned,
            None => Punishment::Noted,
        };
        self.punish(outpoint, punishment, round_id)
    }

    /// Bans `outpoint` for disrupting `round_id`.
    pub fn ban(&mut self, outpoint: OutPoint, round_id: RoundId) -> Punishment {
        self.punish(outpoint, Punishment::Banned, round_id)
    }

    fn punish(
        &mut self,
        outpoint: OutPoint,
        punishment: Punishment,
        round_id: RoundId,
    ) -> Punishment {
        warn!(%outpoint, ?punishment, %round_id, "punishing input");

        self.inmates.insert(
            outpoint,
            Inmate {
                outpoint,
                punishment,
                since: Utc::now(),
                last_disruptive_round: round_id,
            },
        );
        punishment
    }

    /// Whether `outpoint` is barred from registering.
    pub fn is_banned(&self, outpoint: &OutPoint, allow_noted: bool) -> bool {
        match self.inmates.get(outpoint).map(|i| i.punishment) {
            Some(Punishment::Banned) => true,
            Some(Punishment::Noted) => !allow_noted,
            None => false,
        }
    }

    /// Looks up an inmate.
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Inmate> {
        self.inmates.get(outpoint)
    }

    /// Number of punished inputs.
    pub fn len(&self) -> usize {
        self.inmates.len()
    }

    /// Whether nobody is punished.
    pub fn is_empty(&self) -> bool {
        self.inmates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::{sha256, Hash};
    use wabisabi_test_utils::bitcoin::generate_outpoint;

    use super::*;

    fn round_id() -> RoundId {
        RoundId::from_hash(sha256::Hash::all_zeros())
    }

    #[test]
    fn noting_twice_escalates_to_a_ban() {
        let mut prison = Prison::new();
        let outpoint = generate_outpoint();

        assert_eq!(prison.note(outpoint, round_id()), Punishment::Noted);
        assert!(prison.is_banned(&outpoint, false));
        assert!(!prison.is_banned(&outpoint, true));

        assert_eq!(prison.note(outpoint, round_id()), Punishment::Banned);
        assert!(prison.is_banned(&outpoint, true));
        assert_eq!(prison.len(), 1);
    }

    #[test]
    fn bans_are_recorded_with_their_round() {
        let mut prison = Prison::new();
        let outpoint = generate_outpoint();
        prison.ban(outpoint, round_id());

        let inmate = prison.get(&outpoint).expect("must be imprisoned");
        assert_eq!(inmate.punishment, Punishment::Banned);
        assert_eq!(inmate.last_disruptive_round, round_id());
        assert!(!prison.is_banned(&generate_outpoint(), false));
    }
}
