use thiserror::Error;

use crate::{client::DurationId, time::GameDate};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MinderError {
    #[error("duration {0} has zero length")]
    ZeroDuration(DurationId),
    #[error("duration {id} is already registered for {target}")]
    AlreadyRegistered { id: DurationId, target: GameDate },
    #[error("duration {0} is not registered")]
    NotRegistered(DurationId),
    #[error("target date of duration {0} overflows the game clock")]
    DateOverflow(DurationId),
    #[error("duration {id} targets {target}, before last processed date {last_processed}")]
    ScheduledInPast {
        id: DurationId,
        target: GameDate,
        last_processed: GameDate,
    },
    #[error("advance to {current} is before last processed date {last_processed}")]
    DateRegression {
        current: GameDate,
        last_processed: GameDate,
    },
    #[error("advance to {current} requested while {dispatching} is being dispatched")]
    ReentrantAdvance {
        current: GameDate,
        dispatching: GameDate,
    },
    #[error("client of duration {0} is already borrowed")]
    ClientBusy(DurationId),
    #[error("inconsistent minder state: {0}")]
    InconsistentState(String),
}

impl MinderError {
    /// caller-side bookkeeping bug, as opposed to a broken minder.
    pub fn is_invalid_registration(&self) -> bool {
        matches!(
            self,
            MinderError::ZeroDuration(_)
                | MinderError::AlreadyRegistered { .. }
                | MinderError::NotRegistered(_)
                | MinderError::DateOverflow(_)
                | MinderError::ScheduledInPast { .. }
        )
    }
}
