use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    mem,
    rc::Rc,
};

use tracing::{debug, info, warn};

use crate::{
    client::{DurationId, MinderDuration},
    error::MinderError,
    time::{GameClock, GameDate},
};

/// where a registration lives: its target date and the serial of the `add` that put it there.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Slot {
    date: GameDate,
    serial: u64,
}

struct Registration {
    serial: u64,
    duration: MinderDuration,
}

/// outcome of one `advance` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    /// dates that had registrations, in the order they were dispatched.
    pub processed_dates: Vec<GameDate>,
    pub fired: usize,
    /// registrations retired because their client was dropped.
    pub skipped_dead: usize,
    pub caught_up: bool,
}

/// builder for a [`DateMinder`]
pub struct DateMinderBuilder {
    clock: Rc<dyn GameClock>,
    label: String,
    start_date: Option<GameDate>,
    check_invariants: bool,
}

impl DateMinderBuilder {
    pub fn new(clock: Rc<dyn GameClock>) -> Self {
        Self {
            clock,
            label: String::from("minder"),
            start_date: None,
            check_invariants: cfg!(debug_assertions),
        }
    }

    /// name attached to every log line of this minder.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// last processed date before the first tick. defaults to the clock's current date.
    pub fn with_start_date(mut self, date: GameDate) -> Self {
        self.start_date = Some(date);
        self
    }

    /// run [`DateMinder::verify_invariants`] after every advance.
    /// on by default in debug builds.
    pub fn with_invariant_checks(mut self, on: bool) -> Self {
        self.check_invariants = on;
        self
    }

    pub fn build(self) -> DateMinder {
        let last_processed = self.start_date.unwrap_or_else(|| self.clock.now());
        DateMinder {
            label: self.label,
            clock: self.clock,
            last_processed,
            dispatching: None,
            buckets: BTreeMap::new(),
            lookup: HashMap::new(),
            pending_adds: Vec::new(),
            pending_removals: Vec::new(),
            next_serial: 0,
            check_invariants: self.check_invariants,
        }
    }
}

/// Wakes clients when the game date they asked for is reached.
///
/// Registrations are coalesced per target date. `add` and `remove` never touch
/// the due index directly: they are staged and folded in at the start of the
/// next `advance` (and again before each date is dispatched), so clients may
/// call them from inside their own callback.
pub struct DateMinder {
    label: String,
    clock: Rc<dyn GameClock>,
    last_processed: GameDate,
    dispatching: Option<GameDate>,
    buckets: BTreeMap<GameDate, HashMap<DurationId, Registration>>,
    lookup: HashMap<DurationId, Slot>,
    pending_adds: Vec<(Slot, MinderDuration)>,
    pending_removals: Vec<(Slot, DurationId)>,
    next_serial: u64,
    check_invariants: bool,
}

impl DateMinder {
    /// Register `duration` to fire at `clock.now() + duration`.
    ///
    /// From inside a callback the duration counts from the later of the clock
    /// and the date being dispatched, so a new target always lies after it.
    /// Returns the target date. Fails if the duration is zero, already
    /// registered, or would land before the last processed date.
    pub fn add(&mut self, duration: &MinderDuration) -> Result<GameDate, MinderError> {
        let id = duration.id();
        if duration.duration().is_zero() {
            return Err(MinderError::ZeroDuration(id));
        }
        if let Some(slot) = self.lookup.get(&id) {
            return Err(MinderError::AlreadyRegistered {
                id,
                target: slot.date,
            });
        }

        let now = match self.dispatching {
            Some(date) => self.clock.now().max(date),
            None => self.clock.now(),
        };
        let target = now
            .checked_add(duration.duration())
            .ok_or(MinderError::DateOverflow(id))?;
        if target < self.last_processed {
            return Err(MinderError::ScheduledInPast {
                id,
                target,
                last_processed: self.last_processed,
            });
        }

        let slot = Slot {
            date: target,
            serial: self.next_serial,
        };
        self.next_serial += 1;
        self.lookup.insert(id, slot);
        self.pending_adds.push((slot, duration.clone()));
        self.dispatch_log(format_args!("add {duration:?} -> {target}"));
        Ok(target)
    }

    /// Cancel a registration that has not fired yet. Returns the date it was due on.
    pub fn remove(&mut self, duration: &MinderDuration) -> Result<GameDate, MinderError> {
        let id = duration.id();
        let slot = self
            .lookup
            .remove(&id)
            .ok_or(MinderError::NotRegistered(id))?;
        self.pending_removals.push((slot, id));
        self.dispatch_log(format_args!("remove {duration:?} from {}", slot.date));
        Ok(slot.date)
    }

    /// Fire every registration due on `current`.
    ///
    /// With `allow_catch_up`, every date with registrations earlier than
    /// `current` is dispatched first, oldest first. Errors returned by a
    /// client stop the tick and are passed through; registrations not yet
    /// fired stay due.
    pub fn advance(
        &mut self,
        current: GameDate,
        allow_catch_up: bool,
    ) -> Result<AdvanceReport, MinderError> {
        if let Some(dispatching) = self.dispatching {
            return Err(MinderError::ReentrantAdvance {
                current,
                dispatching,
            });
        }
        if current < self.last_processed {
            return Err(MinderError::DateRegression {
                current,
                last_processed: self.last_processed,
            });
        }

        let mut report = AdvanceReport {
            caught_up: allow_catch_up,
            ..AdvanceReport::default()
        };
        self.fold_staged();

        if allow_catch_up {
            loop {
                // reschedules from the previous date may land before `current`
                self.fold_staged();
                let Some(date) = self.buckets.range(..current).next().map(|(d, _)| *d) else {
                    break;
                };
                info!(
                    minder = %self.label,
                    "catching up on {date} (last processed {}, now {current})",
                    self.last_processed
                );
                self.dispatch_date(date, &mut report)?;
            }
        }
        self.dispatch_date(current, &mut report)?;
        self.last_processed = current;

        if self.check_invariants {
            self.verify_invariants()?;
        }

        debug!(
            minder = %self.label,
            date = %current,
            fired = report.fired,
            dates = report.processed_dates.len(),
            "tick complete"
        );
        Ok(report)
    }

    /// [`advance`](Self::advance), catching up only when `current` skips past
    /// the tick after the last processed date.
    pub fn tick(&mut self, current: GameDate) -> Result<AdvanceReport, MinderError> {
        let skipped = current > self.last_processed.next();
        self.advance(current, skipped)
    }

    fn dispatch_date(
        &mut self,
        date: GameDate,
        report: &mut AdvanceReport,
    ) -> Result<(), MinderError> {
        self.fold_staged();
        let Some(snapshot) = self.buckets.remove(&date) else {
            return Ok(());
        };
        report.processed_dates.push(date);

        self.dispatching = Some(date);
        let result = self.dispatch_snapshot(date, snapshot, report);
        self.dispatching = None;
        result
    }

    fn dispatch_snapshot(
        &mut self,
        date: GameDate,
        snapshot: HashMap<DurationId, Registration>,
        report: &mut AdvanceReport,
    ) -> Result<(), MinderError> {
        let mut queue: Vec<(DurationId, Registration)> = snapshot.into_iter().collect();
        while let Some((id, reg)) = queue.pop() {
            let slot = Slot {
                date,
                serial: reg.serial,
            };
            // cancelled or re-added by an earlier callback on this date
            if self.lookup.get(&id) != Some(&slot) {
                continue;
            }
            let Some(client) = reg.duration.client() else {
                self.lookup.remove(&id);
                report.skipped_dead += 1;
                self.dispatch_log(format_args!("client of {id} is gone, retired"));
                continue;
            };
            let Ok(mut client) = client.try_borrow_mut() else {
                queue.push((id, reg));
                self.restore(date, queue);
                return Err(MinderError::ClientBusy(id));
            };

            // unregistered before the callback so the client can add it again
            self.lookup.remove(&id);
            let outcome = client.on_date_reached(&reg.duration, self);
            drop(client);
            if let Err(err) = outcome {
                warn!(minder = %self.label, "dispatch of {id} on {date} failed: {err}");
                self.restore(date, queue);
                return Err(err);
            }

            report.fired += 1;
            self.dispatch_log(format_args!("fired {:?} on {date}", reg.duration));
        }
        Ok(())
    }

    /// put back the part of a snapshot that was not dispatched.
    fn restore(&mut self, date: GameDate, rest: Vec<(DurationId, Registration)>) {
        if rest.is_empty() {
            return;
        }
        let bucket = self.buckets.entry(date).or_default();
        for (id, reg) in rest {
            bucket.insert(id, reg);
        }
    }

    /// apply staged additions, then staged removals, to the due index.
    fn fold_staged(&mut self) {
        for (slot, duration) in mem::take(&mut self.pending_adds) {
            self.buckets.entry(slot.date).or_default().insert(
                duration.id(),
                Registration {
                    serial: slot.serial,
                    duration,
                },
            );
        }

        for (slot, id) in mem::take(&mut self.pending_removals) {
            let Some(bucket) = self.buckets.get_mut(&slot.date) else {
                continue;
            };
            if bucket.get(&id).is_some_and(|r| r.serial == slot.serial) {
                bucket.remove(&id);
            }
            if bucket.is_empty() {
                self.buckets.remove(&slot.date);
            }
        }
    }

    /// Check that the due index and the lookup agree.
    ///
    /// Every duration sits in at most one bucket, every live lookup resolves
    /// to its bucket or to a staged add, and no bucket is empty. Always `Ok`
    /// while a date is being dispatched, since the in-flight snapshot is
    /// outside the index.
    pub fn verify_invariants(&self) -> Result<(), MinderError> {
        if self.dispatching.is_some() {
            return Ok(());
        }

        let mut seen: HashMap<DurationId, GameDate> = HashMap::new();
        for (date, bucket) in &self.buckets {
            if bucket.is_empty() {
                return Err(MinderError::InconsistentState(format!(
                    "empty bucket left on {date}"
                )));
            }
            for (id, reg) in bucket {
                if let Some(other) = seen.insert(*id, *date) {
                    return Err(MinderError::InconsistentState(format!(
                        "{id} is due on both {other} and {date}"
                    )));
                }
                let slot = Slot {
                    date: *date,
                    serial: reg.serial,
                };
                let live = self.lookup.get(id) == Some(&slot);
                let leaving = self
                    .pending_removals
                    .iter()
                    .any(|(s, i)| i == id && *s == slot);
                if !live && !leaving {
                    return Err(MinderError::InconsistentState(format!(
                        "{id} is due on {date} but is neither live nor staged for removal"
                    )));
                }
            }
        }

        for (id, slot) in &self.lookup {
            let due = self
                .buckets
                .get(&slot.date)
                .and_then(|b| b.get(id))
                .is_some_and(|r| r.serial == slot.serial);
            let staged = self
                .pending_adds
                .iter()
                .any(|(s, d)| d.id() == *id && s == slot);
            if !due && !staged {
                return Err(MinderError::InconsistentState(format!(
                    "{id} resolves to {} but is not due there",
                    slot.date
                )));
            }
        }
        Ok(())
    }

    /// date `duration` will fire on, if it is registered.
    pub fn target_date(&self, duration: &MinderDuration) -> Option<GameDate> {
        self.lookup.get(&duration.id()).map(|s| s.date)
    }

    pub fn is_scheduled(&self, duration: &MinderDuration) -> bool {
        self.lookup.contains_key(&duration.id())
    }

    /// removed, not added again, and the removal has not been folded into the due index yet.
    pub fn is_scheduled_for_removal(&self, duration: &MinderDuration) -> bool {
        let id = duration.id();
        !self.lookup.contains_key(&id) && self.pending_removals.iter().any(|(_, i)| *i == id)
    }

    /// number of live registrations, staged ones included.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// earliest date a live registration is due on. registrations of the
    /// snapshot being dispatched are not counted.
    pub fn next_due_date(&self) -> Option<GameDate> {
        let due = self
            .buckets
            .iter()
            .find(|(date, bucket)| {
                bucket.iter().any(|(id, reg)| {
                    self.lookup.get(id)
                        == Some(&Slot {
                            date: **date,
                            serial: reg.serial,
                        })
                })
            })
            .map(|(date, _)| *date);
        let staged = self
            .pending_adds
            .iter()
            .filter(|(slot, d)| self.lookup.get(&d.id()) == Some(slot))
            .map(|(slot, _)| slot.date)
            .min();
        match (due, staged) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn last_processed(&self) -> GameDate {
        self.last_processed
    }

    /// date currently being dispatched, when called from inside a callback.
    pub fn dispatching_date(&self) -> Option<GameDate> {
        self.dispatching
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    #[cfg(feature = "dispatch_tracing")]
    fn dispatch_log(&self, msg: fmt::Arguments<'_>) {
        tracing::debug!(minder = %self.label, "{msg}");
    }

    #[cfg(not(feature = "dispatch_tracing"))]
    fn dispatch_log(&self, _msg: fmt::Arguments<'_>) {}
}

impl fmt::Debug for DateMinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DateMinder")
            .field("label", &self.label)
            .field("last_processed", &self.last_processed)
            .field("registered", &self.lookup.len())
            .field("due_dates", &self.buckets.len())
            .finish()
    }
}
