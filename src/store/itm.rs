use crate::error::{new_error, Error, ErrorKind};

use super::mmio::{modify32, read32, unlock, write16, write32, write8};
use super::streaming::{write_frame, Stimulus, StreamingBackend};
use super::DataStoreType;

const STIM_FIFOREADY: u32 = 1 << 0;

const TER: usize = 0xe00;
const TPR: usize = 0xe40;
const TCR: usize = 0xe80;

const TCR_BUSY: u32 = 1 << 23;
const TCR_TRACEID_MASK: u32 = 0x007f_0000;
const TCR_TRACEID_SHIFT: u32 = 16;
const TCR_GTSFREQ_MASK: u32 = 0xc00;
const TCR_TSPRESCALE_MASK: u32 = 0x300;
const TCR_SWOENA: u32 = 1 << 4;
const TCR_TXENA: u32 = 1 << 3;
const TCR_SYNCENA: u32 = 1 << 2;
const TCR_TSENA: u32 = 1 << 1;
const TCR_ITMENA: u32 = 1 << 0;

const DEMCR_TRCENA: u32 = 1 << 24;

const FRAME_MARKER: u16 = 0xffff;

/// Where the ITM lives and which stimulus ports to use.
#[derive(Debug, Clone, Copy)]
pub struct ItmConfig {
    /// Base address of the ITM registers.
    pub registers: usize,
    /// First stimulus port used.
    pub min_port: u16,
    /// Number of stimulus ports used, one per channel.
    pub ports: u16,
    /// Trace ID to program, or keep the current one.
    pub trace_id: Option<u8>,
    /// Address of the debug exception and monitor control register on
    /// M-profile cores, where trace must be enabled first.
    pub demcr: Option<usize>,
}

/// The Instrumentation Trace Macrocell.
///
/// Each frame starts with a 16-bit `0xffff` packet; the data follows as byte
/// and word packets on the channel's stimulus port.
#[derive(Debug)]
pub struct Itm {
    config: ItmConfig,
}

impl Itm {
    /// # Safety
    ///
    /// The addresses in `config` must map the ITM (and the DEMCR) of the
    /// target for the life of the store.
    pub unsafe fn new(config: ItmConfig) -> Self {
        Self { config }
    }

    fn enable_ports(&self) {
        let first = self.config.min_port as u32;
        let end = first + self.config.ports as u32;

        for block in first / 32..=(end - 1) / 32 {
            let lo = first.max(block * 32) - block * 32;
            let hi = end.min(block * 32 + 32) - block * 32;
            let mask = low_bits(hi) & !low_bits(lo);

            unsafe { modify32(self.config.registers + TER + block as usize * 4, |ter| ter | mask) };
        }
    }

    fn enable_unprivileged_access(&self) {
        let bits = (self.config.ports as u32 + 7) / 8;
        let first = self.config.min_port as u32 / 8;
        let mask = low_bits(bits).checked_shl(first).unwrap_or(0);

        unsafe { modify32(self.config.registers + TPR, |tpr| tpr & !mask) };
    }
}

fn low_bits(n: u32) -> u32 {
    if n >= 32 {
        !0
    } else {
        (1 << n) - 1
    }
}

impl StreamingBackend for Itm {
    fn init(&self) -> Result<(), Error> {
        let base = self.config.registers;
        if base == 0 || self.config.ports == 0 {
            return Err(new_error(ErrorKind::StoreInit));
        }

        unsafe {
            if let Some(demcr) = self.config.demcr {
                modify32(demcr, |v| v | DEMCR_TRCENA);
            }

            unlock(base);

            modify32(base + TCR, |tcr| tcr & !TCR_ITMENA);
            let mut tcr = read32(base + TCR);
            while tcr & TCR_BUSY != 0 {
                tcr = read32(base + TCR);
            }

            self.enable_ports();
            self.enable_unprivileged_access();

            if let Some(id) = self.config.trace_id {
                tcr &= !TCR_TRACEID_MASK;
                tcr |= ((id as u32) << TCR_TRACEID_SHIFT) & TCR_TRACEID_MASK;
            }

            // Local timestamps from the processor clock, no global ones
            tcr &= !(TCR_GTSFREQ_MASK | TCR_TSPRESCALE_MASK | TCR_SWOENA);
            tcr |= TCR_TXENA | TCR_SYNCENA | TCR_TSENA | TCR_ITMENA;

            write32(base + TCR, tcr);
        }

        debug!("ITM enabled on {} ports from {}", self.config.ports, self.config.min_port);
        Ok(())
    }

    fn write_frame(&self, data: &[u8], channel: u16, flush: bool) {
        let port = self.config.min_port as usize + channel as usize;
        let mut stimulus = StimulusPort(self.config.registers + port * 4);
        write_frame(&mut stimulus, data, flush);
    }

    fn channels(&self) -> u16 {
        self.config.ports
    }

    fn data_store_type(&self) -> DataStoreType {
        DataStoreType::Itm
    }
}

/// One ITM stimulus port. Every write waits for FIFO space first.
struct StimulusPort(usize);

impl StimulusPort {
    fn wait_ready(&self) {
        while unsafe { read32(self.0) } & STIM_FIFOREADY == 0 {}
    }
}

impl Stimulus for StimulusPort {
    fn marker(&mut self) {
        self.wait_ready();
        unsafe { write16(self.0, FRAME_MARKER) };
    }

    fn byte(&mut self, value: u8) {
        self.wait_ready();
        unsafe { write8(self.0, value) };
    }

    fn word(&mut self, value: u32) {
        self.wait_ready();
        unsafe { write32(self.0, value) };
    }
}
