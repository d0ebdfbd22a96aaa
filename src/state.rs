//! Per-core PMU state and the PMU family table.
//!
//! Each core's PMU is driven through a small state machine. Requests made
//! from any core (enable, disable) only move a core to one of the `SHOULD_*`
//! states; the transition to `STARTED` or `STOPPED`, and the lazy programming
//! of the counters, happen on the target core itself when it next samples.
//!
//! ```text
//! UNINITIALIZED -> SHOULD_START, SHOULD_STOP
//! SHOULD_START  -> SHOULD_STOP, STARTED, STOPPED, UNINITIALIZED
//! SHOULD_STOP   -> SHOULD_START, STARTED, STOPPED, UNINITIALIZED
//! STARTED       -> SHOULD_STOP, STOPPED
//! STOPPED       -> SHOULD_START, STARTED
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::atomic::{AtomicInt, AtomicTimestamp};
use crate::error::{new_error, Error, ErrorKind};
use crate::pmu::{CounterDriver, MAX_PMU_COUNTERS};

pub(crate) const UNINITIALIZED: u32 = 0;
pub(crate) const SHOULD_START: u32 = 1;
pub(crate) const SHOULD_STOP: u32 = 2;
pub(crate) const STARTED: u32 = 3;
pub(crate) const STOPPED: u32 = 4;

pub(crate) const INIT_UNINITIALIZED: u32 = 0;
pub(crate) const INIT_INITIALIZING: u32 = 1;
pub(crate) const INIT_INITIALIZED: u32 = 2;

/// Bits of the MIDR compared when matching a family: implementer, part
/// number and architecture, ignoring variant and revision.
pub(crate) const MIDR_FAMILY_MASK: u32 = 0xff00_fff0;

/// The outcome of one attempt at a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Failed,
    Succeeded,
    /// Lost a race with another core; try again with the updated state.
    Retry,
}

#[derive(Debug)]
pub(crate) struct CoreState {
    pub(crate) run: AtomicU32,
    pub(crate) init: AtomicU32,
    pub(crate) num_counters: AtomicU32,
    pub(crate) last_sample: AtomicTimestamp,
    /// Set once a sample has been written since the PMU was initialised.
    pub(crate) sampled: AtomicBool,
}

impl CoreState {
    fn new() -> Self {
        Self {
            run: AtomicU32::new(UNINITIALIZED),
            init: AtomicU32::new(INIT_UNINITIALIZED),
            num_counters: AtomicU32::new(0),
            last_sample: AtomicTimestamp::new(0),
            sampled: AtomicBool::new(false),
        }
    }

    fn swap(&self, current: &mut u32, target: u32) -> Transition {
        if self.run.atomic_cas_strong(current, target) {
            Transition::Succeeded
        } else {
            Transition::Retry
        }
    }

    /// Attempt to move `core` from `current` to `target`, starting or
    /// stopping the counters on the way to `STARTED` or `STOPPED`.
    ///
    /// On [`Transition::Retry`] `current` holds the state that won.
    pub(crate) fn try_change<D: CounterDriver>(
        &self,
        core: u32,
        current: &mut u32,
        target: u32,
        driver: &D,
    ) -> Transition {
        match (target, *current) {
            (UNINITIALIZED, UNINITIALIZED) => Transition::Succeeded,
            (UNINITIALIZED, SHOULD_START) | (UNINITIALIZED, SHOULD_STOP) => self.swap(current, target),

            (SHOULD_START, UNINITIALIZED) | (SHOULD_START, SHOULD_STOP) | (SHOULD_START, STOPPED) => {
                self.swap(current, target)
            }
            (SHOULD_START, SHOULD_START) | (SHOULD_START, STARTED) => Transition::Succeeded,

            (SHOULD_STOP, SHOULD_START) | (SHOULD_STOP, STARTED) => self.swap(current, target),
            (SHOULD_STOP, SHOULD_STOP) | (SHOULD_STOP, STOPPED) => Transition::Succeeded,

            (STARTED, STARTED) | (STOPPED, STOPPED) => Transition::Succeeded,
            (STARTED, SHOULD_START) | (STARTED, STOPPED) | (STARTED, SHOULD_STOP) => {
                self.settle(core, current, target, SHOULD_STOP, SHOULD_START, |c| driver.start(c))
            }
            (STOPPED, SHOULD_START) | (STOPPED, SHOULD_STOP) | (STOPPED, STARTED) => {
                self.settle(core, current, target, SHOULD_START, SHOULD_STOP, |c| driver.stop(c))
            }

            _ => Transition::Failed,
        }
    }

    /// Move to a settled state, which needs initialised counters.
    ///
    /// Without them the change fails, but a pending request in the opposite
    /// direction is flipped so the next sample settles where this call
    /// wanted to.
    fn settle<F: FnOnce(u32)>(
        &self,
        core: u32,
        current: &mut u32,
        target: u32,
        opposite: u32,
        pending: u32,
        apply: F,
    ) -> Transition {
        if self.init.atomic_load() == INIT_INITIALIZED {
            if self.run.atomic_cas_strong(current, target) {
                apply(core);
                return Transition::Succeeded;
            }
            return Transition::Retry;
        }

        if *current == opposite && self.run.atomic_cas_strong(current, pending) {
            *current = pending;
        }
        Transition::Failed
    }

    /// Retry [`try_change`](#method.try_change) until it settles.
    pub(crate) fn change<D: CounterDriver>(&self, core: u32, target: u32, driver: &D) -> bool {
        let mut current = self.run.atomic_load();
        loop {
            match self.try_change(core, &mut current, target, driver) {
                Transition::Retry => continue,
                result => return result == Transition::Succeeded,
            }
        }
    }
}

/// A PMU configuration applied to every core whose MIDR matches.
#[derive(Debug)]
pub(crate) struct PmuFamily {
    ready: AtomicBool,
    midr: AtomicU32,
    num_events: AtomicU32,
    events: [AtomicU32; MAX_PMU_COUNTERS],
    all_cores: AtomicBool,
    cores: Box<[AtomicBool]>,
}

impl PmuFamily {
    fn new(max_cores: u32) -> Self {
        Self {
            ready: AtomicBool::new(false),
            midr: AtomicU32::new(0),
            num_events: AtomicU32::new(0),
            events: Default::default(),
            all_cores: AtomicBool::new(false),
            cores: (0..max_cores).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub(crate) fn midr(&self) -> u32 {
        self.midr.atomic_load()
    }

    pub(crate) fn allows(&self, core: u32) -> bool {
        self.all_cores.load(Ordering::Acquire)
            || self
                .cores
                .get(core as usize)
                .map_or(false, |c| c.load(Ordering::Acquire))
    }

    fn overlaps(&self, allowed: Option<&[u32]>) -> bool {
        match allowed {
            None => self.all_cores.load(Ordering::Acquire) || self.cores.iter().any(|c| c.load(Ordering::Acquire)),
            Some(cores) => cores.iter().any(|c| self.allows(*c)),
        }
    }

    /// Copy the event types into `out`, returning how many there are.
    pub(crate) fn event_types(&self, out: &mut [u32; MAX_PMU_COUNTERS]) -> usize {
        let n = self.num_events.atomic_load() as usize;
        for (slot, event) in out.iter_mut().zip(self.events[..n].iter()) {
            *slot = event.atomic_load();
        }
        n
    }
}

/// Registered families, appended to by compare-and-swap on `count`.
///
/// A slot is reserved first and only becomes visible to lookups once
/// `ready` is set, after its contents are written.
#[derive(Debug)]
pub(crate) struct FamilyTable {
    count: AtomicU32,
    families: Box<[PmuFamily]>,
}

impl FamilyTable {
    fn new(max_families: u32, max_cores: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            families: (0..max_families).map(|_| PmuFamily::new(max_cores)).collect(),
        }
    }

    fn ready(&self) -> impl Iterator<Item = &PmuFamily> {
        let n = (self.count.atomic_load() as usize).min(self.families.len());
        self.families[..n]
            .iter()
            .filter(|f| f.ready.load(Ordering::Acquire))
    }

    fn register(&self, midr: u32, events: &[u32], allowed: Option<&[u32]>) -> Result<u32, Error> {
        let capacity = self.families.len() as u32;
        let mut index = self.count.atomic_load();

        loop {
            if index >= capacity {
                error!("Could not add PMU family as the table is full (midr=0x{:x})", midr);
                return Err(new_error(ErrorKind::FamilyTableFull));
            }

            if self
                .ready()
                .any(|f| f.midr() == midr && f.overlaps(allowed))
            {
                error!("Could not add PMU family as its cores overlap an existing family (midr=0x{:x})", midr);
                return Err(new_error(ErrorKind::OverlappingCores));
            }

            let next = index + 1;
            if self.count.atomic_cas_weak(&mut index, next) {
                break;
            }
        }

        let family = &self.families[index as usize];
        let n = events.len().min(MAX_PMU_COUNTERS);
        family.midr.atomic_store(midr);
        for (slot, event) in family.events.iter().zip(events[..n].iter()) {
            slot.atomic_store(*event);
        }
        family.num_events.atomic_store(n as u32);

        match allowed {
            None => family.all_cores.store(true, Ordering::Release),
            Some(cores) => {
                for core in cores {
                    if let Some(c) = family.cores.get(*core as usize) {
                        c.store(true, Ordering::Release);
                    }
                }
            }
        }

        family.ready.store(true, Ordering::Release);
        Ok(n as u32)
    }
}

/// The PMU state of every core and the family table.
#[derive(Debug)]
pub(crate) struct PmuState {
    started: AtomicBool,
    cores: Box<[CoreState]>,
    families: FamilyTable,
}

impl PmuState {
    pub(crate) fn new(max_cores: u32, max_families: u32) -> Self {
        Self {
            started: AtomicBool::new(false),
            cores: (0..max_cores).map(|_| CoreState::new()).collect(),
            families: FamilyTable::new(max_families, max_cores),
        }
    }

    pub(crate) fn core(&self, core: u32) -> Option<&CoreState> {
        self.cores.get(core as usize)
    }

    pub(crate) fn cores(&self) -> impl Iterator<Item = (u32, &CoreState)> {
        self.cores.iter().enumerate().map(|(i, c)| (i as u32, c))
    }

    pub(crate) fn set_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Register a family, returning the number of events kept.
    ///
    /// `allowed` limits the family to the listed cores; `None` allows every
    /// core.
    pub(crate) fn register_family(&self, midr: u32, events: &[u32], allowed: Option<&[u32]>) -> Result<u32, Error> {
        if self.is_started() {
            error!("Could not add PMU family as sampling has started (midr=0x{:x})", midr);
            return Err(new_error(ErrorKind::SamplingStarted));
        }

        self.families.register(midr, events, allowed)
    }

    /// The first family matching `midr` that allows `core`.
    pub(crate) fn find_family(&self, midr: u32, core: u32) -> Option<&PmuFamily> {
        self.families
            .ready()
            .find(|f| f.midr() & MIDR_FAMILY_MASK == midr & MIDR_FAMILY_MASK && f.allows(core))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct CountingDriver {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl CounterDriver for CountingDriver {
        fn init(&self, _core: u32, event_types: &[u32]) -> Result<u32, Error> {
            Ok(event_types.len() as u32 + 1)
        }

        fn start(&self, _core: u32) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn stop(&self, _core: u32) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn read_counter(&self, _core: u32, _counter_no: u32) -> u64 {
            0
        }
    }

    fn initialized() -> CoreState {
        let c = CoreState::new();
        c.init.atomic_store(INIT_INITIALIZED);
        c
    }

    #[test]
    fn test_requests_need_no_init() {
        let driver = CountingDriver::default();
        let c = CoreState::new();

        assert!(c.change(0, SHOULD_START, &driver));
        assert!(c.change(0, SHOULD_STOP, &driver));
        assert!(c.change(0, SHOULD_START, &driver));
        assert!(c.change(0, UNINITIALIZED, &driver));
        assert_eq!(c.run.atomic_load(), UNINITIALIZED);

        // Stopping something never started is refused
        assert!(!c.change(0, SHOULD_STOP, &driver));
        assert!(!c.change(0, STARTED, &driver));
        assert_eq!(driver.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_settle_starts_and_stops() {
        let driver = CountingDriver::default();
        let c = initialized();

        assert!(c.change(0, SHOULD_START, &driver));
        assert!(c.change(0, STARTED, &driver));
        assert!(c.change(0, STARTED, &driver));
        assert_eq!(driver.starts.load(Ordering::SeqCst), 1);

        // Settled states cannot go back to uninitialized
        assert!(!c.change(0, UNINITIALIZED, &driver));

        assert!(c.change(0, STOPPED, &driver));
        assert_eq!(driver.stops.load(Ordering::SeqCst), 1);
        assert_eq!(c.run.atomic_load(), STOPPED);
    }

    #[test]
    fn test_settle_without_init_flips_pending_request() {
        let driver = CountingDriver::default();
        let c = CoreState::new();
        c.run.atomic_store(SHOULD_STOP);

        let mut current = SHOULD_STOP;
        assert_eq!(c.try_change(0, &mut current, STARTED, &driver), Transition::Failed);
        assert_eq!(current, SHOULD_START);
        assert_eq!(c.run.atomic_load(), SHOULD_START);

        let mut current = SHOULD_START;
        assert_eq!(c.try_change(0, &mut current, STOPPED, &driver), Transition::Failed);
        assert_eq!(c.run.atomic_load(), SHOULD_STOP);
        assert_eq!(driver.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_state_retries() {
        let driver = CountingDriver::default();
        let c = initialized();
        c.run.atomic_store(SHOULD_STOP);

        let mut current = SHOULD_START;
        assert_eq!(c.try_change(0, &mut current, STARTED, &driver), Transition::Retry);
        assert_eq!(current, SHOULD_STOP);
        assert_eq!(c.try_change(0, &mut current, STARTED, &driver), Transition::Succeeded);
    }

    #[test]
    fn test_concurrent_start_runs_driver_once() {
        let driver = CountingDriver::default();
        let c = initialized();
        c.run.atomic_store(SHOULD_START);
        let barrier = std::sync::Barrier::new(4);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    barrier.wait();
                    assert!(c.change(0, STARTED, &driver));
                });
            }
        });

        assert_eq!(driver.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_family_lookup_masks_revision() {
        let state = PmuState::new(2, 2);
        state
            .register_family(0x410f_c090, &[1, 2], None)
            .expect("register");

        let family = state.find_family(0x412f_c091, 1).expect("family");
        let mut events = [0; MAX_PMU_COUNTERS];
        assert_eq!(family.event_types(&mut events), 2);
        assert_eq!(&events[..2], &[1, 2]);

        assert!(state.find_family(0x410f_d030, 0).is_none());
    }

    #[test]
    fn test_family_core_restriction() {
        let state = PmuState::new(4, 2);
        state
            .register_family(0x410f_d030, &[1], Some(&[0, 1]))
            .expect("little");
        state
            .register_family(0x410f_d070, &[2], Some(&[2, 3]))
            .expect("big");

        assert_eq!(state.find_family(0x410f_d030, 1).map(|f| f.midr()), Some(0x410f_d030));
        assert!(state.find_family(0x410f_d030, 2).is_none());
        assert_eq!(state.find_family(0x410f_d070, 3).map(|f| f.midr()), Some(0x410f_d070));
    }

    #[test]
    fn test_family_overlap_and_capacity() {
        let state = PmuState::new(4, 2);
        state
            .register_family(0x410f_d030, &[1], Some(&[0, 1]))
            .expect("first");

        let err = state
            .register_family(0x410f_d030, &[1], Some(&[1, 2]))
            .expect_err("overlap");
        assert_eq!(err.kind(), &ErrorKind::OverlappingCores);

        let err = state
            .register_family(0x410f_d030, &[1], None)
            .expect_err("all cores overlap");
        assert_eq!(err.kind(), &ErrorKind::OverlappingCores);

        state
            .register_family(0x410f_d030, &[1], Some(&[2, 3]))
            .expect("disjoint");

        let err = state
            .register_family(0x410f_d070, &[1], None)
            .expect_err("full");
        assert_eq!(err.kind(), &ErrorKind::FamilyTableFull);
    }

    #[test]
    fn test_family_events_truncated() {
        let state = PmuState::new(1, 1);
        let events: Vec<u32> = (0..40).collect();
        assert_eq!(
            state.register_family(1, &events, None).expect("register"),
            MAX_PMU_COUNTERS as u32
        );
    }

    #[test]
    fn test_family_rejected_after_start() {
        let state = PmuState::new(1, 1);
        state.set_started();

        let err = state.register_family(1, &[], None).expect_err("started");
        assert_eq!(err.kind(), &ErrorKind::SamplingStarted);
    }
}
