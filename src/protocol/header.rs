//! Layout of the protocol header.
//!
//! The fixed part is always 92 bytes. The string table, the per-core PMU
//! settings and the optional task, memory map and chart tables follow, sized
//! from the agent configuration, then the data store parameters at an 8 byte
//! aligned offset.

use std::mem::size_of;
use std::sync::atomic::Ordering;

use crate::atomic::AtomicInt;
use crate::pmu::MAX_PMU_COUNTERS;
use crate::store::{DataStore, HEADER_PARAMS_LENGTH};

use super::writer::{align_up, Writer};
use super::Protocol;

/// The protocol version written to the header.
pub const PROTOCOL_VERSION: u32 = 3;

/// The magic value, "BARMAN64" or "BARMAN32" by pointer width. Written in
/// native byte order, so it also tells the decoder the endianness.
#[cfg(target_pointer_width = "64")]
pub const MAGIC: u64 = 0x4241_524d_414e_3634;

/// The magic value, "BARMAN64" or "BARMAN32" by pointer width. Written in
/// native byte order, so it also tells the decoder the endianness.
#[cfg(not(target_pointer_width = "64"))]
pub const MAGIC: u64 = 0x4241_524d_414e_3332;

pub(crate) const MAGIC_OFFSET: usize = 0;
pub(crate) const LAST_TIMESTAMP_OFFSET: usize = 24;
pub(crate) const STRING_TABLE_OFFSET: usize = 92;

/// configuration_timestamp, midr, mpidr, cluster_id, num_counters, types
pub(crate) const PMU_SETTINGS_LENGTH: usize = 8 + 4 + size_of::<usize>() + 4 + 4 + 4 * MAX_PMU_COUNTERS;

/// timestamp, task_id, name_ptr
pub(crate) const TASK_INFO_LENGTH: usize = 8 + 4 + 4;

/// name_ptr, series_composition, rendering_type, boolean_flags
pub(crate) const CHART_LENGTH: usize = 4 + 1 + 1 + 1;

/// chart_index, name, units, description, colour, multiplier, clazz,
/// display, boolean_flags
pub(crate) const SERIES_LENGTH: usize = 5 * 4 + 8 + 3;

/// base_address, length, image_offset, image_ptr; task aware headers add a
/// timestamp and task id in front.
pub(crate) const fn mmap_layout_length(task_aware: bool) -> usize {
    let entry = 3 * size_of::<usize>() + 4;
    if task_aware {
        8 + 4 + entry
    } else {
        entry
    }
}

/// Offsets of the variable parts of a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HeaderLayout {
    pub(crate) pmu_settings: usize,
    pub(crate) tasks: Option<usize>,
    pub(crate) mmaps: Option<usize>,
    pub(crate) charts: Option<usize>,
    pub(crate) params: usize,
    pub(crate) length: usize,
}

impl HeaderLayout {
    pub(crate) fn new(
        max_cores: u32,
        max_task_infos: u32,
        max_mmap_layouts: u32,
        string_table_length: u32,
        num_charts: usize,
        num_series: usize,
    ) -> Self {
        let mut at = STRING_TABLE_OFFSET + 4 + string_table_length as usize;

        let pmu_settings = at;
        at += max_cores as usize * PMU_SETTINGS_LENGTH;

        let tasks = if max_task_infos > 0 {
            at = align_up(at, 4);
            let tasks = at;
            at += 4 + max_task_infos as usize * TASK_INFO_LENGTH;
            Some(tasks)
        } else {
            None
        };

        let mmaps = if max_mmap_layouts > 0 {
            at = align_up(at, 4);
            let mmaps = at;
            at += 4 + max_mmap_layouts as usize * mmap_layout_length(max_task_infos > 0);
            Some(mmaps)
        } else {
            None
        };

        let charts = if num_series > 0 {
            at = align_up(at, 4);
            let charts = at;
            at += 4 + num_charts * CHART_LENGTH + num_series * SERIES_LENGTH;
            Some(charts)
        } else {
            None
        };

        let params = align_up(at, 8);
        let length = align_up(params + HEADER_PARAMS_LENGTH, 8);

        Self {
            pmu_settings,
            tasks,
            mmaps,
            charts,
            params,
            length,
        }
    }
}

impl<S: DataStore> Protocol<S> {
    /// Write the current header into `out`, which must be `header_length()`
    /// bytes long.
    ///
    /// The data store parameters are left zero; in-memory stores keep the
    /// live values in place.
    pub(super) fn render(&self, out: &mut [u8]) {
        let mut w = Writer::new(out);

        w.u64(if self.is_initialized() { MAGIC } else { 0 });
        w.u32(PROTOCOL_VERSION);
        w.u32(self.layout.length as u32);
        w.u32(self.store.data_store_type() as u32);
        w.u32(self.target_name_ptr.atomic_load());
        w.u64(self.last_timestamp.load());
        w.u32(self.timer_sample_rate.atomic_load());

        w.u32(self.max_cores);
        w.u32(self.tasks.len() as u32);
        w.u32(self.mmaps.len() as u32);
        w.u32(MAX_PMU_COUNTERS as u32);
        w.u32(self.strings.capacity());
        w.u32(self.series.len() as u32);

        for field in &self.clock {
            w.u64(field.atomic_load());
        }

        debug_assert_eq!(w.position(), STRING_TABLE_OFFSET);
        w.u32(self.strings.len());
        self.strings.copy_to(w.slice(self.strings.capacity() as usize));

        for settings in self.pmu_settings.iter() {
            w.u64(settings.timestamp.atomic_load());
            w.u32(settings.midr.atomic_load());
            w.usize(settings.mpidr.atomic_load());
            w.u32(settings.cluster.atomic_load());
            w.u32(settings.num_counters.atomic_load());
            for t in settings.types.iter() {
                w.u32(t.atomic_load());
            }
        }

        if self.layout.tasks.is_some() {
            w.align(4);
            w.u32(self.num_tasks.atomic_load());
            for task in self.tasks.iter() {
                w.u64(task.timestamp.atomic_load());
                w.u32(task.task_id.atomic_load());
                w.u32(task.name_ptr.atomic_load());
            }
        }

        if self.layout.mmaps.is_some() {
            w.align(4);
            w.u32(self.num_mmaps.atomic_load());
            for mmap in self.mmaps.iter() {
                if self.is_task_aware() {
                    w.u64(mmap.timestamp.atomic_load());
                    w.u32(mmap.task_id.atomic_load());
                }
                w.usize(mmap.base_address.atomic_load());
                w.usize(mmap.length.atomic_load());
                w.usize(mmap.image_offset.atomic_load());
                w.u32(mmap.image_ptr.atomic_load());
            }
        }

        if self.layout.charts.is_some() {
            w.align(4);
            w.u32(self.charts.len() as u32);
            for (chart, name) in self.charts.iter().zip(self.chart_names.iter()) {
                w.u32(name.atomic_load());
                w.u8(chart.series_composition as u8);
                w.u8(chart.rendering_type as u8);
                w.u8(chart.flags());
            }
            for series in self.series.iter() {
                w.u32(series.chart_index);
                w.u32(series.name.atomic_load());
                w.u32(series.units.atomic_load());
                w.u32(series.description.atomic_load());
                w.u32(series.series.colour);
                w.f64(series.series.multiplier);
                w.u8(series.series.clazz as u8);
                w.u8(series.series.display as u8);
                w.u8(series.series.flags());
            }
        }

        w.align(8);
        debug_assert_eq!(w.position(), self.layout.params);
        w.zero(HEADER_PARAMS_LENGTH);
        w.align(8);

        debug_assert!(!w.is_overflowed());
        debug_assert_eq!(w.position(), self.layout.length);
    }

    /// Render the header and hand it to the store.
    ///
    /// Concurrent callers are combined: whoever holds the image renders
    /// again for updates made meanwhile, and the others return at once.
    pub(super) fn publish(&self, core: u32, timestamp: u64) {
        let image = &self.image;
        image.dirty.store(true, Ordering::Release);

        while image
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            while image.dirty.swap(false, Ordering::AcqRel) {
                // Only the holder of `busy` touches the bytes
                let bytes = unsafe { &mut *image.bytes.get() };
                self.render(bytes);
                self.store.notify_header_updated(core, timestamp, bytes);
            }

            image.busy.store(false, Ordering::Release);
            if !image.dirty.load(Ordering::Acquire) {
                break;
            }
        }
    }
}
