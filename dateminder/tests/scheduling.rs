use std::{cell::RefCell, collections::HashMap, rc::Rc};

use dateminder::{
    DateMinder, DateMinderBuilder, DateMinderClient, DurationId, GameClock, GameDate, GameDuration,
    ManualClock, MinderDuration, MinderError,
};
use proptest::prelude::*;

type FireLog = Rc<RefCell<Vec<(DurationId, GameDate)>>>;

struct Logger {
    log: FireLog,
}

impl DateMinderClient for Logger {
    fn on_date_reached(
        &mut self,
        fired: &MinderDuration,
        minder: &mut DateMinder,
    ) -> Result<(), MinderError> {
        let date = minder.dispatching_date().unwrap_or_default();
        self.log.borrow_mut().push((fired.id(), date));
        Ok(())
    }
}

/// reschedules itself every `period` ticks, counted from the clock at fire time.
struct Cycler {
    period: GameDuration,
    fires: Vec<GameDate>,
}

impl DateMinderClient for Cycler {
    fn on_date_reached(
        &mut self,
        fired: &MinderDuration,
        minder: &mut DateMinder,
    ) -> Result<(), MinderError> {
        self.fires.push(minder.dispatching_date().unwrap_or_default());
        let mut again = fired.clone();
        again.set_duration(self.period);
        minder.add(&again)?;
        Ok(())
    }
}

fn new_minder(clock: &ManualClock) -> DateMinder {
    DateMinderBuilder::new(Rc::new(clock.clone()))
        .with_label("scheduling-test")
        .with_invariant_checks(true)
        .build()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

#[test]
fn skipped_ticks_are_caught_up_in_order() {
    init_tracing();
    let clock = ManualClock::new(GameDate(0));
    let mut minder = new_minder(&clock);
    let log = FireLog::default();

    let mut clients = Vec::new();
    let mut durations = Vec::new();
    for ticks in [3, 2, 3, 2] {
        let client = Rc::new(RefCell::new(Logger { log: log.clone() }));
        let d = MinderDuration::new(&client, GameDuration(ticks));
        minder.add(&d).unwrap();
        clients.push(client);
        durations.push(d);
    }

    clock.set(GameDate(1));
    assert_eq!(minder.tick(GameDate(1)).unwrap().fired, 0);

    clock.set(GameDate(4));
    let report = minder.tick(GameDate(4)).unwrap();
    assert!(report.caught_up);
    assert_eq!(report.fired, 4);
    assert_eq!(report.processed_dates, vec![GameDate(2), GameDate(3)]);

    let fired = log.borrow();
    let dates: Vec<GameDate> = fired.iter().map(|(_, date)| *date).collect();
    assert_eq!(dates, vec![GameDate(2), GameDate(2), GameDate(3), GameDate(3)]);
    for d in &durations {
        assert_eq!(fired.iter().filter(|(id, _)| *id == d.id()).count(), 1);
        assert!(!minder.is_scheduled(d));
    }
    assert_eq!(minder.next_due_date(), None);
}

#[derive(Debug, Clone)]
enum Op {
    Add(usize, u64),
    Remove(usize),
    Advance(u64, bool),
}

const SLOTS: usize = 6;

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..SLOTS, 1u64..=8).prop_map(|(i, ticks)| Op::Add(i, ticks)),
        (0..SLOTS).prop_map(Op::Remove),
        (0u64..=4, any::<bool>()).prop_map(|(step, catch_up)| Op::Advance(step, catch_up)),
    ]
}

proptest! {
    #[test]
    fn random_operations_match_model(ops in prop::collection::vec(op(), 1..80)) {
        let clock = ManualClock::new(GameDate(0));
        let mut minder = new_minder(&clock);
        let log = FireLog::default();

        let clients: Vec<_> = (0..SLOTS)
            .map(|_| Rc::new(RefCell::new(Logger { log: log.clone() })))
            .collect();
        let mut durations: Vec<_> = clients
            .iter()
            .map(|c| MinderDuration::new(c, GameDuration(1)))
            .collect();
        let slot_of: HashMap<DurationId, usize> = durations
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id(), i))
            .collect();

        // slot -> target date
        let mut model: HashMap<usize, GameDate> = HashMap::new();

        for op in ops {
            match op {
                Op::Add(i, ticks) => {
                    durations[i].set_duration(GameDuration(ticks));
                    let result = minder.add(&durations[i]);
                    match model.get(&i) {
                        Some(target) => {
                            prop_assert_eq!(
                                result,
                                Err(MinderError::AlreadyRegistered { id: durations[i].id(), target: *target })
                            );
                        }
                        None => {
                            let target = GameDate(clock.now().0 + ticks);
                            prop_assert_eq!(result, Ok(target));
                            model.insert(i, target);
                        }
                    }
                }
                Op::Remove(i) => {
                    let result = minder.remove(&durations[i]);
                    match model.remove(&i) {
                        Some(target) => {
                            prop_assert_eq!(result, Ok(target));
                            prop_assert!(minder.is_scheduled_for_removal(&durations[i]));
                        }
                        None => {
                            prop_assert_eq!(result, Err(MinderError::NotRegistered(durations[i].id())));
                        }
                    }
                }
                Op::Advance(step, catch_up) => {
                    let now = GameDate(clock.now().0 + step);
                    clock.set(now);
                    log.borrow_mut().clear();
                    minder.advance(now, catch_up).unwrap();

                    let mut due: Vec<(usize, GameDate)> = model
                        .iter()
                        .filter(|(_, target)| if catch_up { **target <= now } else { **target == now })
                        .map(|(i, target)| (*i, *target))
                        .collect();
                    for (i, _) in &due {
                        model.remove(i);
                    }

                    let mut fired: Vec<(usize, GameDate)> = log
                        .borrow()
                        .iter()
                        .map(|(id, date)| (slot_of[id], *date))
                        .collect();
                    let dates: Vec<GameDate> = fired.iter().map(|(_, d)| *d).collect();
                    prop_assert!(dates.windows(2).all(|w| w[0] <= w[1]));

                    fired.sort();
                    due.sort();
                    prop_assert_eq!(fired, due);
                    prop_assert_eq!(minder.last_processed(), now);
                }
            }

            prop_assert!(minder.verify_invariants().is_ok());
            prop_assert_eq!(minder.len(), model.len());
            for (i, d) in durations.iter().enumerate() {
                prop_assert_eq!(minder.target_date(d), model.get(&i).copied());
            }
        }
    }

    #[test]
    fn recurring_clients_fire_once_per_due_date(
        periods in prop::collection::vec(1u64..=6, 1..6),
        steps in prop::collection::vec(1u64..=5, 1..40),
    ) {
        let clock = ManualClock::new(GameDate(0));
        let mut minder = new_minder(&clock);

        let clients: Vec<_> = periods
            .iter()
            .map(|p| Rc::new(RefCell::new(Cycler { period: GameDuration(*p), fires: Vec::new() })))
            .collect();
        let durations: Vec<_> = clients
            .iter()
            .zip(&periods)
            .map(|(c, p)| MinderDuration::new(c, GameDuration(*p)))
            .collect();

        let mut targets: Vec<GameDate> = Vec::new();
        let mut expected: Vec<Vec<GameDate>> = vec![Vec::new(); periods.len()];
        for d in &durations {
            targets.push(minder.add(d).unwrap());
        }

        for step in steps {
            let now = GameDate(clock.now().0 + step);
            clock.set(now);
            minder.tick(now).unwrap();

            for (i, p) in periods.iter().enumerate() {
                if targets[i] <= now {
                    expected[i].push(targets[i]);
                    targets[i] = GameDate(now.0 + p);
                }
                prop_assert_eq!(minder.target_date(&durations[i]), Some(targets[i]));
            }
        }

        for (client, want) in clients.iter().zip(&expected) {
            let fires = client.borrow().fires.clone();
            prop_assert_eq!(&fires, want);
        }
    }
}
