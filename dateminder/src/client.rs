use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{error::MinderError, minder::DateMinder, time::GameDuration};

static NEXT_DURATION_ID: AtomicU64 = AtomicU64::new(1);

/// unique token identifying one client-owned duration.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DurationId(u64);

impl DurationId {
    fn next() -> Self {
        DurationId(NEXT_DURATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DurationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Anything that wants to be woken on a game date.
///
/// The callback runs while the minder is dispatching. It may call
/// [`DateMinder::add`] and [`DateMinder::remove`] on the minder it is given,
/// including re-adding `fired` to reschedule itself. Returning an error aborts
/// the current tick and hands the error to the caller of `advance`.
pub trait DateMinderClient {
    fn on_date_reached(
        &mut self,
        fired: &MinderDuration,
        minder: &mut DateMinder,
    ) -> Result<(), MinderError>;
}

/// A wake-up request owned by a client: "call me `duration` ticks from now".
///
/// Clones share the same [`DurationId`] and therefore count as the same
/// registration. The minder only keeps a weak reference to the client.
#[derive(Clone)]
pub struct MinderDuration {
    id: DurationId,
    duration: GameDuration,
    client: Weak<RefCell<dyn DateMinderClient>>,
}

impl MinderDuration {
    pub fn new<C>(client: &Rc<RefCell<C>>, duration: GameDuration) -> Self
    where
        C: DateMinderClient + 'static,
    {
        let client: Rc<RefCell<dyn DateMinderClient>> = client.clone();
        Self::from_dyn(&client, duration)
    }

    pub fn from_dyn(client: &Rc<RefCell<dyn DateMinderClient>>, duration: GameDuration) -> Self {
        Self {
            id: DurationId::next(),
            duration,
            client: Rc::downgrade(client),
        }
    }

    pub fn id(&self) -> DurationId {
        self.id
    }

    pub fn duration(&self) -> GameDuration {
        self.duration
    }

    /// change the length used by the next `add`. does not touch a live registration.
    pub fn set_duration(&mut self, duration: GameDuration) {
        self.duration = duration;
    }

    pub(crate) fn client(&self) -> Option<Rc<RefCell<dyn DateMinderClient>>> {
        self.client.upgrade()
    }
}

impl PartialEq for MinderDuration {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MinderDuration {}

impl fmt::Debug for MinderDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.duration)
    }
}
