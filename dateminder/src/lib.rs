mod time;
mod error;
mod client;
mod minder;

pub use time::{GameDate, GameDuration, GameClock, ManualClock};
pub use error::MinderError;
pub use client::{DurationId, DateMinderClient, MinderDuration};
pub use minder::{DateMinderBuilder, DateMinder, AdvanceReport};
