use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// game date, in simulation ticks since the start of the game.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct GameDate(pub u64);

impl GameDate {
    /// advance by a duration.
    pub fn checked_add(&self, d: GameDuration) -> Option<GameDate> {
        self.0.checked_add(d.0).map(GameDate)
    }

    /// the tick immediately after this one.
    pub fn next(&self) -> GameDate {
        GameDate(self.0.saturating_add(1))
    }
}

impl fmt::Display for GameDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// offset from "now", in ticks. zero is not a valid registration.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct GameDuration(pub u64);

impl GameDuration {
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for GameDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

/// source of the current game date. driven by the game-time service, never by the minder.
pub trait GameClock {
    fn now(&self) -> GameDate;
}

/// clock advanced by hand from the game loop. clones share the same date.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<GameDate>>,
}

impl ManualClock {
    pub fn new(start: GameDate) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    /// move the clock to `date`. earlier dates are ignored to keep it monotonic.
    pub fn set(&self, date: GameDate) {
        if date > self.now.get() {
            self.now.set(date);
        }
    }

    /// move the clock forward by `ticks` and return the new date.
    pub fn step(&self, ticks: u64) -> GameDate {
        let next = GameDate(self.now.get().0.saturating_add(ticks));
        self.now.set(next);
        next
    }
}

impl GameClock for ManualClock {
    fn now(&self) -> GameDate {
        self.now.get()
    }
}
