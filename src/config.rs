use crate::agent::Agent;
use crate::error::{new_error, Error, ErrorKind};
use crate::platform::Platform;
use crate::pmu::CounterDriver;
use crate::protocol::chart::CustomChart;
use crate::store::DataStore;

const DEFAULT_MAX_CORES: u32 = 1;
const DEFAULT_MAX_TASK_INFOS: u32 = 8;
const DEFAULT_MAX_MMAP_LAYOUTS: u32 = 0;
const DEFAULT_MAX_PMU_FAMILIES: u32 = 1;
const DEFAULT_STRING_TABLE_LENGTH: u32 = 1024;
const DEFAULT_MIN_SAMPLE_PERIOD: u64 = 0;
const DEFAULT_RECORDS_PER_HEADER_SENT: u32 = 500;

/// Configure the capacities and behaviour of an [`Agent`].
///
/// Every capacity is fixed when the agent is built; the header layout is
/// derived from them and never changes afterwards. Unset values take the
/// defaults listed on each getter.
///
/// ```
/// use barman::store::{Arena, LinearBuffer};
/// use barman::pmu::{sim::SimulatedPmu, ArmPmu};
/// use barman::{AgentConfig, HostPlatform};
///
/// let config = AgentConfig::default()
///     .set_max_cores(2)
///     .set_min_sample_period(1_000_000);
///
/// let agent = config.build(
///     LinearBuffer::new(Arena::new(16 * 1024), 2),
///     HostPlatform::new()?,
///     ArmPmu::new(SimulatedPmu::new(4), 2),
/// )?;
/// #
/// # Ok::<(), barman::Error>(())
/// ```
///
/// [`Agent`]: ../struct.Agent.html
#[derive(Debug, Default, Clone)]
pub struct AgentConfig {
    max_cores: Option<u32>,
    max_task_infos: Option<u32>,
    max_mmap_layouts: Option<u32>,
    max_pmu_families: Option<u32>,
    string_table_length: Option<u32>,
    min_sample_period: Option<u64>,
    records_per_header_sent: Option<u32>,
    charts: Vec<CustomChart>,
}

impl AgentConfig {
    /// The number of cores that may record data. Core numbers returned by the
    /// platform must be below this.
    pub fn set_max_cores(self, max_cores: u32) -> Self {
        Self {
            max_cores: Some(max_cores),
            ..self
        }
    }

    /// Capacity of the task table in the header.
    ///
    /// A value of 0 disables task awareness: records carry no task id and
    /// task switches are not recorded.
    pub fn set_max_task_infos(self, max_task_infos: u32) -> Self {
        Self {
            max_task_infos: Some(max_task_infos),
            ..self
        }
    }

    /// Capacity of the memory map table in the header. 0 disables it.
    pub fn set_max_mmap_layouts(self, max_mmap_layouts: u32) -> Self {
        Self {
            max_mmap_layouts: Some(max_mmap_layouts),
            ..self
        }
    }

    /// The number of PMU families that may be registered.
    pub fn set_max_pmu_families(self, max_pmu_families: u32) -> Self {
        Self {
            max_pmu_families: Some(max_pmu_families),
            ..self
        }
    }

    /// Size in bytes of the string table in the header.
    pub fn set_string_table_length(self, string_table_length: u32) -> Self {
        Self {
            string_table_length: Some(string_table_length),
            ..self
        }
    }

    /// Samples closer together than this many nanoseconds are dropped.
    pub fn set_min_sample_period(self, min_sample_period: u64) -> Self {
        Self {
            min_sample_period: Some(min_sample_period),
            ..self
        }
    }

    /// For streaming stores, the header is sent again after this many
    /// samples. 0 sends it only when it changes.
    pub fn set_records_per_header_sent(self, records_per_header_sent: u32) -> Self {
        Self {
            records_per_header_sent: Some(records_per_header_sent),
            ..self
        }
    }

    /// Declare a custom chart. Its series are numbered after those of any
    /// chart added before it.
    pub fn add_chart(mut self, chart: CustomChart) -> Self {
        self.charts.push(chart);
        self
    }

    /// Defaults to 1.
    pub fn max_cores(&self) -> u32 {
        self.max_cores.unwrap_or(DEFAULT_MAX_CORES)
    }

    /// Defaults to 8.
    pub fn max_task_infos(&self) -> u32 {
        self.max_task_infos.unwrap_or(DEFAULT_MAX_TASK_INFOS)
    }

    /// Defaults to 0.
    pub fn max_mmap_layouts(&self) -> u32 {
        self.max_mmap_layouts.unwrap_or(DEFAULT_MAX_MMAP_LAYOUTS)
    }

    /// Defaults to 1.
    pub fn max_pmu_families(&self) -> u32 {
        self.max_pmu_families.unwrap_or(DEFAULT_MAX_PMU_FAMILIES)
    }

    /// Defaults to 1024 bytes, and is never less than 1.
    pub fn string_table_length(&self) -> u32 {
        self.string_table_length
            .unwrap_or(DEFAULT_STRING_TABLE_LENGTH)
            .max(1)
    }

    /// Defaults to 0, sampling as often as asked.
    pub fn min_sample_period(&self) -> u64 {
        self.min_sample_period.unwrap_or(DEFAULT_MIN_SAMPLE_PERIOD)
    }

    /// Defaults to 500.
    pub fn records_per_header_sent(&self) -> u32 {
        self.records_per_header_sent
            .unwrap_or(DEFAULT_RECORDS_PER_HEADER_SENT)
    }

    /// The declared charts, in order.
    pub fn charts(&self) -> &[CustomChart] {
        &self.charts
    }

    /// Build an agent recording into `store`.
    ///
    /// The agent still has to be [initialized] before it records anything.
    ///
    /// [initialized]: ../struct.Agent.html#method.initialize
    pub fn build<S, P, D>(&self, store: S, platform: P, driver: D) -> Result<Agent<S, P, D>, Error>
    where
        S: DataStore,
        P: Platform,
        D: CounterDriver,
    {
        if self.max_cores() == 0 {
            error!("max_cores must be at least 1");
            return Err(new_error(ErrorKind::CoreOutOfRange));
        }

        Ok(Agent::new(self, store, platform, driver))
    }
}
