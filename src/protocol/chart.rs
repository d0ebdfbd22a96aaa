//! Custom counter charts.
//!
//! A chart groups one or more series of user supplied values. Series are
//! numbered in the order they are declared, across all charts, and that
//! number is the counter id used by
//! [`Agent::record_counter_value`](../../struct.Agent.html#method.record_counter_value).

/// Reads a sampled series. Returns `None` when no value is available.
pub type Sampler = fn() -> Option<u64>;

/// At most this many sampled series are read per counter sample; samplers
/// on later series are ignored.
pub const MAX_SAMPLED_SERIES: usize = 32;

/// How the series of a chart are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SeriesComposition {
    /// Series are stacked on top of each other.
    Stacked = 1,
    /// Series are drawn over each other.
    Overlay = 2,
    /// Series are drawn on a logarithmic scale.
    Log10 = 3,
}

/// How a chart is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RenderingType {
    /// Filled area.
    Filled = 1,
    /// Line.
    Line = 2,
    /// Bars.
    Bar = 3,
}

/// What a series value means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SeriesClass {
    /// The change since the previous value.
    Delta = 1,
    /// A count of events since the previous value.
    Incident = 2,
    /// An absolute value.
    Absolute = 3,
}

/// How values are shown when several fall in one display bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SeriesDisplay {
    /// Summed.
    Accumulate = 1,
    /// Averaged.
    Average = 2,
    /// Shown as a rate per second.
    Hertz = 3,
    /// The largest value.
    Maximum = 4,
    /// The smallest value.
    Minimum = 5,
}

pub(crate) const CHART_FLAG_AVERAGE_SELECTION: u8 = 1 << 0;
pub(crate) const CHART_FLAG_AVERAGE_CORES: u8 = 1 << 1;
pub(crate) const CHART_FLAG_PERCENTAGE: u8 = 1 << 2;
pub(crate) const CHART_FLAG_PER_CPU: u8 = 1 << 3;

pub(crate) const SERIES_FLAG_SAMPLED: u8 = 1 << 0;

/// One series of values in a [`CustomChart`].
#[derive(Debug, Clone)]
pub struct ChartSeries {
    pub(crate) name: &'static str,
    pub(crate) units: &'static str,
    pub(crate) description: &'static str,
    pub(crate) colour: u32,
    pub(crate) multiplier: f64,
    pub(crate) clazz: SeriesClass,
    pub(crate) display: SeriesDisplay,
    pub(crate) sampler: Option<Sampler>,
}

impl ChartSeries {
    /// A series named `name` measured in `units`.
    pub fn new(name: &'static str, units: &'static str, clazz: SeriesClass, display: SeriesDisplay) -> Self {
        Self {
            name,
            units,
            description: "",
            colour: 0,
            multiplier: 1.0,
            clazz,
            display,
            sampler: None,
        }
    }

    /// A longer description shown by the host.
    pub fn set_description(self, description: &'static str) -> Self {
        Self {
            description,
            ..self
        }
    }

    /// The colour of the series, as produced by [`rgb`](../colour/fn.rgb.html).
    pub fn set_colour(self, colour: u32) -> Self {
        Self { colour, ..self }
    }

    /// Scale applied to every value by the host.
    pub fn set_multiplier(self, multiplier: f64) -> Self {
        Self { multiplier, ..self }
    }

    /// Read the series with `sampler` on every accepted counter sample.
    pub fn set_sampler(self, sampler: Sampler) -> Self {
        Self {
            sampler: Some(sampler),
            ..self
        }
    }

    /// The name of the series.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn flags(&self) -> u8 {
        if self.sampler.is_some() {
            SERIES_FLAG_SAMPLED
        } else {
            0
        }
    }
}

/// A chart of custom counter series.
///
/// ```
/// use barman::protocol::chart::*;
///
/// let chart = CustomChart::new("Queue", SeriesComposition::Stacked, RenderingType::Line)
///     .set_per_cpu(true)
///     .add_series(ChartSeries::new(
///         "depth",
///         "items",
///         SeriesClass::Absolute,
///         SeriesDisplay::Maximum,
///     ));
///
/// assert_eq!(chart.series().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct CustomChart {
    pub(crate) name: &'static str,
    pub(crate) series_composition: SeriesComposition,
    pub(crate) rendering_type: RenderingType,
    pub(crate) average_selection: bool,
    pub(crate) average_cores: bool,
    pub(crate) percentage: bool,
    pub(crate) per_cpu: bool,
    pub(crate) series: Vec<ChartSeries>,
}

impl CustomChart {
    /// An empty chart.
    pub fn new(name: &'static str, series_composition: SeriesComposition, rendering_type: RenderingType) -> Self {
        Self {
            name,
            series_composition,
            rendering_type,
            average_selection: false,
            average_cores: false,
            percentage: false,
            per_cpu: false,
            series: Vec::new(),
        }
    }

    /// Average over the selected range instead of summing.
    pub fn set_average_selection(self, average_selection: bool) -> Self {
        Self {
            average_selection,
            ..self
        }
    }

    /// Average across cores instead of summing.
    pub fn set_average_cores(self, average_cores: bool) -> Self {
        Self {
            average_cores,
            ..self
        }
    }

    /// Show values as a percentage.
    pub fn set_percentage(self, percentage: bool) -> Self {
        Self { percentage, ..self }
    }

    /// Show one series per core.
    pub fn set_per_cpu(self, per_cpu: bool) -> Self {
        Self { per_cpu, ..self }
    }

    /// Append a series.
    pub fn add_series(mut self, series: ChartSeries) -> Self {
        self.series.push(series);
        self
    }

    /// The series of this chart, in declaration order.
    pub fn series(&self) -> &[ChartSeries] {
        &self.series
    }

    pub(crate) fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.average_selection {
            flags |= CHART_FLAG_AVERAGE_SELECTION;
        }
        if self.average_cores {
            flags |= CHART_FLAG_AVERAGE_CORES;
        }
        if self.percentage {
            flags |= CHART_FLAG_PERCENTAGE;
        }
        if self.per_cpu {
            flags |= CHART_FLAG_PER_CPU;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Option<u64> {
        Some(7)
    }

    #[test]
    fn test_chart_flags() {
        let chart = CustomChart::new("c", SeriesComposition::Overlay, RenderingType::Bar);
        assert_eq!(chart.flags(), 0);

        let chart = chart.set_average_cores(true).set_per_cpu(true);
        assert_eq!(chart.flags(), CHART_FLAG_AVERAGE_CORES | CHART_FLAG_PER_CPU);
    }

    #[test]
    fn test_series_flags() {
        let s = ChartSeries::new("s", "B", SeriesClass::Delta, SeriesDisplay::Hertz);
        assert_eq!(s.flags(), 0);
        assert_eq!(s.multiplier, 1.0);

        let s = s.set_sampler(sample);
        assert_eq!(s.flags(), SERIES_FLAG_SAMPLED);
        assert_eq!((s.sampler.expect("sampler"))(), Some(7));
    }
}
