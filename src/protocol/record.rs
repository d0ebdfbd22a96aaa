use std::mem::size_of;

use crate::atomic::AtomicInt;
use crate::platform::TaskId;
use crate::store::{Block, DataStore};

use super::writer::Writer;
use super::Protocol;

/// Length of the header common to every record: type, core and timestamp.
pub const RECORD_HEADER_LENGTH: usize = 4 + 4 + 8;

/// The type tag at the start of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RecordType {
    /// Counter values.
    Sample = 1,
    /// Counter values and the program counter.
    SampleWithPc = 2,
    /// A task switch.
    TaskSwitch = 3,
    /// A custom counter value.
    CustomCounter = 4,
    /// An annotation.
    Annotation = 5,
    /// The core entered or left a halt.
    HaltEvent = 6,
}

/// Why the previous task was switched out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskSwitchReason {
    /// The task was preempted and is still runnable.
    Preempted = 0,
    /// The task blocked waiting for something.
    Waiting = 1,
}

/// The kind of an annotation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AnnotationType {
    /// Text on a channel.
    String = 0,
    /// A marker on the timeline.
    Bookmark = 1,
    /// Names a channel.
    ChannelName = 2,
    /// Names a group of channels.
    GroupName = 3,
}

/// Annotation colours.
pub mod colour {
    /// Let the host pick a colour.
    pub const CYCLIC: u32 = 0;

    /// Build a colour from its components.
    pub const fn rgb(red: u8, green: u8, blue: u8) -> u32 {
        0x1b << 24 | (red as u32) << 16 | (green as u32) << 8 | blue as u32
    }

    #[allow(missing_docs)]
    pub const RED: u32 = rgb(255, 0, 0);
    #[allow(missing_docs)]
    pub const BLUE: u32 = rgb(0, 0, 255);
    #[allow(missing_docs)]
    pub const GREEN: u32 = rgb(0, 255, 0);
    #[allow(missing_docs)]
    pub const PURPLE: u32 = rgb(255, 0, 255);
    #[allow(missing_docs)]
    pub const YELLOW: u32 = rgb(255, 255, 0);
    #[allow(missing_docs)]
    pub const CYAN: u32 = rgb(0, 255, 255);
    #[allow(missing_docs)]
    pub const WHITE: u32 = rgb(255, 255, 255);
    #[allow(missing_docs)]
    pub const LTGRAY: u32 = rgb(187, 187, 187);
    #[allow(missing_docs)]
    pub const DKGRAY: u32 = rgb(85, 85, 85);
    #[allow(missing_docs)]
    pub const BLACK: u32 = rgb(0, 0, 0);
}

const CUSTOM_VALUE_LENGTH: usize = 4 + 8;

impl<S: DataStore> Protocol<S> {
    /// Raise the last timestamp, then reserve a block and write the record
    /// header into it.
    ///
    /// The last timestamp moves even when no block is available.
    fn get_block_and_fill_header(
        &self,
        length: usize,
        core: u32,
        record_type: RecordType,
        timestamp: u64,
    ) -> Option<Block<'_>> {
        if !self.is_initialized() {
            debug!("Could not write as not initialized");
            return None;
        }

        if core >= self.max_cores {
            debug!("Could not write as core {} >= max cores", core);
            return None;
        }

        self.raise_last_timestamp(timestamp);

        let mut block = self.store.get_block(core, length)?;
        let mut w = Writer::new(&mut block);
        w.u32(record_type as u32);
        w.u32(core);
        w.u64(timestamp);

        Some(block)
    }

    fn write_record<F>(&self, core: u32, record_type: RecordType, timestamp: u64, length: usize, fill: F) -> bool
    where
        F: FnOnce(&mut Writer<'_>),
    {
        let mut block = match self.get_block_and_fill_header(length, core, record_type, timestamp) {
            Some(b) => b,
            None => return false,
        };

        {
            let mut w = Writer::at(&mut block, RECORD_HEADER_LENGTH);
            fill(&mut w);
            debug_assert!(!w.is_overflowed());
            debug_assert_eq!(w.position(), length);
        }

        self.store.commit_block(core, block);
        true
    }

    /// Write a counter sample.
    ///
    /// `custom` holds (series id, value) pairs and is dropped when no custom
    /// counters are configured. A `pc` makes it a
    /// [`SampleWithPc`](enum.RecordType.html#variant.SampleWithPc) record.
    pub fn write_sample(
        &self,
        timestamp: u64,
        core: u32,
        task_id: TaskId,
        pc: Option<usize>,
        counters: &[u64],
        custom: &[(u32, u64)],
    ) -> bool {
        let task_aware = self.is_task_aware();
        let has_custom = !self.series.is_empty();
        let custom = if has_custom { custom } else { &[] };

        let length = RECORD_HEADER_LENGTH
            + if task_aware { 4 } else { 0 }
            + if has_custom { 4 } else { 0 }
            + pc.map_or(0, |_| size_of::<usize>())
            + counters.len() * 8
            + custom.len() * CUSTOM_VALUE_LENGTH;

        let record_type = if pc.is_some() {
            RecordType::SampleWithPc
        } else {
            RecordType::Sample
        };

        let written = self.write_record(core, record_type, timestamp, length, |w| {
            if task_aware {
                w.u32(task_id);
            }
            if has_custom {
                w.u32(custom.len() as u32);
            }
            if let Some(pc) = pc {
                w.usize(pc);
            }
            for value in counters {
                w.u64(*value);
            }
            for (id, value) in custom {
                w.u32(*id);
                w.u64(*value);
            }
        });

        if written {
            self.count_header_record(core, timestamp);
        }
        written
    }

    /// Streaming stores get the header again every
    /// `records_per_header_sent` samples, so a host that joins late can
    /// decode.
    fn count_header_record(&self, core: u32, timestamp: u64) {
        if self.records_per_header_sent == 0 || self.store.data_store_type().is_in_memory() {
            return;
        }

        if self.header_counter.atomic_fetch_add(1) == self.records_per_header_sent {
            self.header_counter.atomic_store(0);
            self.publish(core, timestamp);
        }
    }

    /// Write a task switch. Fails unless the agent is task aware.
    pub fn write_task_switch(&self, timestamp: u64, core: u32, task_id: TaskId, reason: TaskSwitchReason) -> bool {
        if !self.is_task_aware() {
            return false;
        }

        let length = RECORD_HEADER_LENGTH + 4 + 1;
        self.write_record(core, RecordType::TaskSwitch, timestamp, length, |w| {
            w.u32(task_id);
            w.u8(reason as u8);
        })
    }

    /// Write the value of custom counter `counter` for `core`. Fails when no
    /// custom counters are configured.
    pub fn write_per_core_custom_counter(
        &self,
        timestamp: u64,
        core: u32,
        task_id: TaskId,
        counter: u32,
        value: u64,
    ) -> bool {
        if self.series.is_empty() {
            return false;
        }

        let task_aware = self.is_task_aware();
        let length = RECORD_HEADER_LENGTH + if task_aware { 4 } else { 0 } + CUSTOM_VALUE_LENGTH;

        self.write_record(core, RecordType::CustomCounter, timestamp, length, |w| {
            if task_aware {
                w.u32(task_id);
            }
            w.u32(counter);
            w.u64(value);
        })
    }

    /// Record that `core` entered (or left) a halt.
    pub fn write_halt_event(&self, timestamp: u64, core: u32, entered_halt: bool) -> bool {
        let length = RECORD_HEADER_LENGTH + 1;
        self.write_record(core, RecordType::HaltEvent, timestamp, length, |w| {
            w.u8(entered_halt as u8);
        })
    }

    /// Write an annotation carrying `data`.
    #[allow(clippy::too_many_arguments)]
    pub fn write_annotation(
        &self,
        timestamp: u64,
        core: u32,
        task_id: TaskId,
        annotation_type: AnnotationType,
        channel: u32,
        group: u32,
        color: u32,
        data: &[u8],
    ) -> bool {
        let fields = AnnotationFields {
            annotation_type,
            channel,
            group,
            color,
        };
        self.annotation(timestamp, core, task_id, &fields, data, false)
    }

    /// Write an annotation carrying `text` and its NUL terminator, or no
    /// data at all for `None`.
    pub(crate) fn write_annotation_text(
        &self,
        timestamp: u64,
        core: u32,
        task_id: TaskId,
        fields: &AnnotationFields,
        text: Option<&str>,
    ) -> bool {
        match text {
            Some(text) => self.annotation(timestamp, core, task_id, fields, text.as_bytes(), true),
            None => self.annotation(timestamp, core, task_id, fields, &[], false),
        }
    }

    fn annotation(
        &self,
        timestamp: u64,
        core: u32,
        task_id: TaskId,
        fields: &AnnotationFields,
        data: &[u8],
        terminate: bool,
    ) -> bool {
        let task_aware = self.is_task_aware();
        let data_length = data.len() + terminate as usize;
        let length = RECORD_HEADER_LENGTH
            + if task_aware { 4 } else { 0 }
            + size_of::<usize>()
            + 4
            + 4
            + 4
            + 1
            + data_length;

        self.write_record(core, RecordType::Annotation, timestamp, length, |w| {
            if task_aware {
                w.u32(task_id);
            }
            w.usize(data_length);
            w.u32(fields.channel);
            w.u32(fields.group);
            w.u32(fields.color);
            w.u8(fields.annotation_type as u8);
            w.bytes(data);
            if terminate {
                w.u8(0);
            }
        })
    }
}

/// Everything in an annotation but its payload.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AnnotationFields {
    pub(crate) annotation_type: AnnotationType,
    pub(crate) channel: u32,
    pub(crate) group: u32,
    pub(crate) color: u32,
}
