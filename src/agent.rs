use std::sync::atomic::{AtomicU64, Ordering};

use crate::atomic::AtomicInt;
use crate::config::AgentConfig;
use crate::error::Error;
use crate::platform::Platform;
use crate::pmu::{CounterDriver, CYCLE_COUNTER_TYPE, INVALID_COUNTER_VALUE, MAX_PMU_COUNTERS};
use crate::protocol::chart::MAX_SAMPLED_SERIES;
use crate::protocol::{
    AnnotationFields, AnnotationType, ClockInfo, MmapLayout, Protocol, TaskInfo, TaskSwitchReason,
};
use crate::state::{
    CoreState, PmuState, Transition, INIT_INITIALIZED, INIT_INITIALIZING, INIT_UNINITIALIZED,
    SHOULD_START, SHOULD_STOP, STARTED, STOPPED, UNINITIALIZED,
};
use crate::store::DataStore;

/// MIDR of the Cortex-A9, ignoring variant and revision.
const CORTEX_A9_MIDR: u32 = 0x4100_c090;

/// Instructions retired, exceptions taken, exception returns, change of
/// context ID, software change of PC, immediate branches.
const CORTEX_A9_EVENTS: [u32; 6] = [0x68, 0x70, 0x71, 0x72, 0x73, 0x74];

/// The profiling agent.
///
/// Built by [`AgentConfig::build`], then [`initialize`]d once with the
/// target's clock. PMU families describe which events to count on which
/// cores; sampling is enabled for every core at once but each core programs
/// its own counters lazily, the first time it samples.
///
/// All methods take `&self` and may be called from any core or interrupt
/// handler concurrently. Sampling methods never block and silently drop
/// records the store has no room for.
///
/// [`AgentConfig::build`]: config/struct.AgentConfig.html#method.build
/// [`initialize`]: #method.initialize
#[derive(Debug)]
pub struct Agent<S, P, D> {
    protocol: Protocol<S>,
    platform: P,
    driver: D,
    state: PmuState,
    max_cores: u32,
    min_sample_period_ns: u64,
    min_sample_period: AtomicU64,
}

impl<S, P, D> Agent<S, P, D>
where
    S: DataStore,
    P: Platform,
    D: CounterDriver,
{
    pub(crate) fn new(config: &AgentConfig, store: S, platform: P, driver: D) -> Self {
        Self {
            protocol: Protocol::new(store, config),
            platform,
            driver,
            state: PmuState::new(config.max_cores(), config.max_pmu_families()),
            max_cores: config.max_cores(),
            min_sample_period_ns: config.min_sample_period(),
            min_sample_period: AtomicU64::new(0),
        }
    }

    /// Write the protocol header and open the data store.
    ///
    /// Only the first successful call has any effect; later calls fail with
    /// [`ErrorKind::AlreadyInitialized`].
    ///
    /// [`ErrorKind::AlreadyInitialized`]: error/enum.ErrorKind.html#variant.AlreadyInitialized
    pub fn initialize(
        &self,
        target_name: &str,
        clock: &ClockInfo,
        tasks: &[TaskInfo<'_>],
        mmaps: &[MmapLayout<'_>],
        timer_sample_rate: u32,
    ) -> Result<(), Error> {
        self.protocol
            .initialize(target_name, clock, tasks, mmaps, timer_sample_rate)?;

        info!(
            "Initialized agent for {} with {} cores",
            target_name, self.max_cores
        );
        Ok(())
    }

    /// Count `events` on cores whose MIDR matches `midr`.
    ///
    /// `allowed_cores` restricts the family to the listed cores, for
    /// big.LITTLE systems where the same part appears in several clusters.
    /// At most 32 events are kept. Families must be registered before
    /// sampling is enabled.
    pub fn initialize_pmu_family(&self, midr: u32, events: &[u32], allowed_cores: Option<&[u32]>) -> Result<(), Error> {
        let kept = self.state.register_family(midr, events, allowed_cores)?;
        info!("PMU family configured as (midr=0x{:x}, n_event_types={})", midr, kept);
        Ok(())
    }

    /// Register the built-in families: the Cortex-A9 on every core.
    pub fn register_default_pmu_families(&self) -> Result<(), Error> {
        self.initialize_pmu_family(CORTEX_A9_MIDR, &CORTEX_A9_EVENTS, None)
    }

    /// Ask every core to start counting.
    ///
    /// Each core starts on its next sample. A single core agent starts
    /// immediately.
    pub fn enable_sampling(&self) {
        self.state.set_started();

        for (core, state) in self.state.cores() {
            state.change(core, SHOULD_START, &self.driver);
        }

        if self.max_cores == 1 {
            self.transition_on_sample(0);
        }
    }

    /// Ask every core to stop counting, taking effect as for
    /// [`enable_sampling`](#method.enable_sampling).
    pub fn disable_sampling(&self) {
        for (core, state) in self.state.cores() {
            state.change(core, SHOULD_STOP, &self.driver);
        }

        if self.max_cores == 1 {
            self.transition_on_sample(0);
        }
    }

    /// Sample the counters of the calling core, optionally with the address
    /// this function returns to as the program counter.
    #[inline(always)]
    pub fn sample_counters(&self, capture_return_address: bool) {
        let pc = if capture_return_address {
            self.platform.return_address()
        } else {
            None
        };
        self.sample_counters_with_program_counter(pc)
    }

    /// Sample the counters of the calling core with `pc` as the program
    /// counter.
    ///
    /// Does nothing unless the core has started counting, and drops samples
    /// taken sooner than the minimum sample period after the last one
    /// written.
    pub fn sample_counters_with_program_counter(&self, pc: Option<usize>) {
        let core = self.platform.core_no();
        let state = match self.state.core(core) {
            Some(s) => s,
            None => return,
        };

        if self.transition_on_sample(core) != STARTED {
            return;
        }

        let num_counters = state.num_counters.atomic_load() as usize;
        if num_counters == 0 {
            return;
        }

        let timestamp = self.platform.timestamp();
        if state.sampled.load(Ordering::Acquire) {
            let last = state.last_sample.load();
            if last.saturating_add(self.min_sample_period.atomic_load()) > timestamp {
                return;
            }
        }

        let mut values = [INVALID_COUNTER_VALUE; MAX_PMU_COUNTERS];
        for (counter, value) in values[..num_counters].iter_mut().enumerate() {
            *value = self.driver.read_counter(core, counter as u32);
        }

        let mut custom = [(0, 0); MAX_SAMPLED_SERIES];
        let mut num_custom = 0;
        for id in 0..self.protocol.num_custom_counters() {
            if num_custom == MAX_SAMPLED_SERIES {
                break;
            }
            let sampler = self.protocol.custom_counter(id).and_then(|s| s.sampler);
            if let Some(value) = sampler.and_then(|f| f()) {
                custom[num_custom] = (id, value);
                num_custom += 1;
            }
        }

        if self.protocol.write_sample(
            timestamp,
            core,
            self.platform.current_task_id(),
            pc,
            &values[..num_counters],
            &custom[..num_custom],
        ) {
            state.last_sample.store(timestamp);
            state.sampled.store(true, Ordering::Release);
        }
    }

    /// Record that the current task was switched in on the calling core.
    pub fn record_task_switch(&self, reason: TaskSwitchReason) {
        let core = self.platform.core_no();
        if core >= self.max_cores {
            return;
        }

        self.protocol.write_task_switch(
            self.platform.timestamp(),
            core,
            self.platform.current_task_id(),
            reason,
        );
    }

    /// Record `value` for custom counter `counter` on the calling core.
    pub fn record_counter_value(&self, counter: u32, value: u64) -> bool {
        let core = self.platform.core_no();
        if core >= self.max_cores || counter >= self.protocol.num_custom_counters() {
            return false;
        }

        self.protocol.write_per_core_custom_counter(
            self.platform.timestamp(),
            core,
            self.platform.current_task_id(),
            counter,
            value,
        )
    }

    /// False when the calling core is out of range.
    fn halt_event(&self, entered: bool) -> bool {
        let core = self.platform.core_no();
        if core >= self.max_cores {
            return false;
        }

        self.protocol
            .write_halt_event(self.platform.timestamp(), core, entered);
        true
    }

    /// Record that the calling core is about to idle.
    pub fn before_idle(&self) {
        self.halt_event(true);
    }

    /// Record that the calling core has left idle.
    pub fn after_idle(&self) {
        self.halt_event(false);
    }

    /// Wait for an interrupt, recording the halt around it.
    pub fn wfi(&self) {
        if self.halt_event(true) {
            self.platform.wait_for_interrupt();
            self.halt_event(false);
        }
    }

    /// Wait for an event, recording the halt around it.
    pub fn wfe(&self) {
        if self.halt_event(true) {
            self.platform.wait_for_event();
            self.halt_event(false);
        }
    }

    fn annotate(&self, annotation_type: AnnotationType, channel: u32, group: u32, color: u32, text: Option<&str>) {
        let core = self.platform.core_no();
        if core >= self.max_cores {
            return;
        }

        let fields = AnnotationFields {
            annotation_type,
            channel,
            group,
            color,
        };
        self.protocol.write_annotation_text(
            self.platform.timestamp(),
            core,
            self.platform.current_task_id(),
            &fields,
            text,
        );
    }

    /// Write `text` to `channel`.
    pub fn annotate_channel(&self, channel: u32, color: u32, text: Option<&str>) {
        self.annotate(AnnotationType::String, channel, 0, color, text)
    }

    /// Name `channel` and place it in `group`.
    pub fn annotate_name_channel(&self, channel: u32, group: u32, name: Option<&str>) {
        self.annotate(AnnotationType::ChannelName, channel, group, 0, name)
    }

    /// Name `group`.
    pub fn annotate_name_group(&self, group: u32, name: Option<&str>) {
        self.annotate(AnnotationType::GroupName, 0, group, 0, name)
    }

    /// Place a bookmark on the timeline.
    pub fn annotate_marker(&self, color: u32, text: Option<&str>) {
        self.annotate(AnnotationType::Bookmark, 0, 0, color, text)
    }

    /// Announce a task created after initialisation.
    pub fn add_task(&self, timestamp: u64, task: &TaskInfo<'_>) -> Result<(), Error> {
        self.protocol.add_task_record(timestamp, task)
    }

    /// Announce an image mapped after initialisation.
    pub fn add_mmap(&self, timestamp: u64, mmap: &MmapLayout<'_>) -> Result<(), Error> {
        self.protocol.add_mmap_record(timestamp, mmap)
    }

    /// Close the data store. Later records are dropped.
    pub fn close(&self) {
        self.protocol.close()
    }

    /// The record layer, for writing records directly.
    pub fn protocol(&self) -> &Protocol<S> {
        &self.protocol
    }

    /// The data store.
    pub fn store(&self) -> &S {
        self.protocol.store()
    }

    /// The data store, for reading back in-memory captures.
    pub fn store_mut(&mut self) -> &mut S {
        self.protocol.store_mut()
    }

    /// The platform.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// The counter driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Program the counters of `core` from the first matching family and
    /// write its PMU settings, exactly once.
    ///
    /// Returns [`Transition::Retry`] while another caller is initialising
    /// the same core.
    fn initialize_pmu(&self, core: u32, state: &CoreState) -> Transition {
        let mut init = INIT_UNINITIALIZED;
        while !state.init.atomic_cas_strong(&mut init, INIT_INITIALIZING) {
            match init {
                INIT_INITIALIZING => return Transition::Retry,
                INIT_INITIALIZED => return Transition::Succeeded,
                _ => init = INIT_UNINITIALIZED,
            }
        }

        let fail = || {
            state.init.atomic_store(INIT_UNINITIALIZED);
            Transition::Failed
        };

        let midr = self.platform.midr();
        let mpidr = self.platform.mpidr();

        let mut events = [0; MAX_PMU_COUNTERS];
        let num_events = match self.state.find_family(midr, core) {
            Some(family) => family.event_types(&mut events),
            None => {
                error!(
                    "Unable to initialize PMU for processor (midr=0x{:x}, no={}), no matching family",
                    midr, core
                );
                return fail();
            }
        };

        let num_counters = match self.driver.init(core, &events[..num_events]) {
            Ok(n) => (n as usize).min(MAX_PMU_COUNTERS),
            Err(e) => {
                error!(
                    "Unable to initialize PMU for processor (midr=0x{:x}, no={}): {}",
                    midr, core, e
                );
                return fail();
            }
        };

        let cycle_counter = self.driver.has_cycle_counter();
        let mut types = [0; MAX_PMU_COUNTERS];
        for (counter, t) in types[..num_counters].iter_mut().enumerate() {
            *t = match (cycle_counter, counter) {
                (true, 0) => CYCLE_COUNTER_TYPE,
                (true, n) => events.get(n - 1).copied().unwrap_or(0),
                (false, n) => events.get(n).copied().unwrap_or(0),
            };
        }

        let cluster = self.platform.map_mpidr_to_cluster_no(mpidr);
        if let Err(e) = self.protocol.write_pmu_settings(
            self.platform.timestamp(),
            midr,
            mpidr,
            cluster,
            core,
            &types[..num_counters],
        ) {
            error!(
                "Unable to initialize PMU for processor (midr=0x{:x}, no={}), could not store PMU settings: {}",
                midr, core, e
            );
            return fail();
        }

        self.min_sample_period
            .atomic_store(self.protocol.minimum_sample_period(self.min_sample_period_ns));
        state.last_sample.store(self.platform.timestamp());
        state.sampled.store(false, Ordering::Release);
        state.num_counters.atomic_store(num_counters as u32);

        info!(
            "Initialize PMU for processor (midr=0x{:x}, no={}) with {} counters",
            midr, core, num_counters
        );
        state.init.atomic_store(INIT_INITIALIZED);
        Transition::Succeeded
    }

    /// Initialise if needed, then try the change. A caller that finds
    /// another initialising the core fails rather than wait for it.
    fn init_and_transition(&self, core: u32, state: &CoreState, current: &mut u32, target: u32) -> Transition {
        match self.initialize_pmu(core, state) {
            Transition::Succeeded => state.try_change(core, current, target, &self.driver),
            Transition::Failed => {
                state.run.atomic_store(UNINITIALIZED);
                *current = UNINITIALIZED;
                Transition::Failed
            }
            Transition::Retry => Transition::Failed,
        }
    }

    /// Settle a pending request for `core`, returning the resulting state.
    fn transition_on_sample(&self, core: u32) -> u32 {
        let state = match self.state.core(core) {
            Some(s) => s,
            None => return UNINITIALIZED,
        };

        let mut current = state.run.atomic_load();
        loop {
            let target = match current {
                SHOULD_START => STARTED,
                SHOULD_STOP => STOPPED,
                _ => return current,
            };

            match self.init_and_transition(core, state, &mut current, target) {
                Transition::Succeeded => return target,
                Transition::Failed => return current,
                Transition::Retry => continue,
            }
        }
    }
}
