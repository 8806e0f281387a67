use dateminder::{
    DateMinder, DateMinderBuilder, DateMinderClient, GameClock, GameDate, GameDuration,
    ManualClock, MinderDuration, MinderError,
};
use rand::Rng;
use std::{cell::RefCell, rc::Rc};
use tokio::time::{Duration, MissedTickBehavior};
use tracing::Level;

const FRAMES: u32 = 60;
const FRAME_DROP_CHANCE: f64 = 0.2;

/// builds a ship every `cadence` ticks until it runs out of hulls.
struct Shipyard {
    name: String,
    cadence: GameDuration,
    hulls_left: u32,
}

impl DateMinderClient for Shipyard {
    fn on_date_reached(
        &mut self,
        fired: &MinderDuration,
        minder: &mut DateMinder,
    ) -> Result<(), MinderError> {
        self.hulls_left -= 1;
        tracing::info!(
            "{} launched a ship on {:?} ({} hulls left)",
            self.name,
            minder.dispatching_date(),
            self.hulls_left
        );
        if self.hulls_left > 0 {
            let mut next = fired.clone();
            next.set_duration(self.cadence);
            minder.add(&next)?;
        }
        Ok(())
    }
}

/// one-shot research that shuts down a shipyard once it completes.
struct Research {
    topic: String,
    obsoletes: Option<MinderDuration>,
}

impl DateMinderClient for Research {
    fn on_date_reached(
        &mut self,
        _fired: &MinderDuration,
        minder: &mut DateMinder,
    ) -> Result<(), MinderError> {
        tracing::info!("research '{}' complete", self.topic);
        if let Some(yard) = self.obsoletes.take() {
            if minder.is_scheduled(&yard) {
                let date = minder.remove(&yard)?;
                tracing::info!("cancelled shipyard order due on {date}");
            }
        }
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), MinderError> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    let clock = ManualClock::new(GameDate(0));
    let mut minder = DateMinderBuilder::new(Rc::new(clock.clone()))
        .with_label("galaxy")
        .build();

    let alpha = Rc::new(RefCell::new(Shipyard {
        name: "Alpha yard".into(),
        cadence: GameDuration(4),
        hulls_left: 5,
    }));
    let beta = Rc::new(RefCell::new(Shipyard {
        name: "Beta yard".into(),
        cadence: GameDuration(3),
        hulls_left: 20,
    }));
    let alpha_order = MinderDuration::new(&alpha, GameDuration(4));
    let beta_order = MinderDuration::new(&beta, GameDuration(3));
    minder.add(&alpha_order)?;
    minder.add(&beta_order)?;

    let warp = Rc::new(RefCell::new(Research {
        topic: "warp drive".into(),
        obsoletes: Some(beta_order.clone()),
    }));
    let warp_done = MinderDuration::new(&warp, GameDuration(25));
    minder.add(&warp_done)?;

    let mut frames = tokio::time::interval(Duration::from_millis(16));
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut rng = rand::rng();

    for _ in 0..FRAMES {
        frames.tick().await;

        // a dropped frame means the game clock moves several ticks at once
        let ticks = if rng.random_bool(FRAME_DROP_CHANCE) {
            rng.random_range(2..=4)
        } else {
            1
        };
        let now = clock.step(ticks);
        let report = minder.tick(now)?;
        if report.caught_up {
            tracing::debug!("frame drop: jumped {ticks} ticks to {now}");
        }

        if minder.is_empty() {
            tracing::info!("nothing left to mind at {}", clock.now());
            break;
        }
    }

    tracing::info!("finished at {} with {:?}", clock.now(), minder);
    Ok(())
}
