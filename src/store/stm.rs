use crate::error::{new_error, Error, ErrorKind};

use super::mmio::{modify32, unlock, write32, write8};
use super::streaming::{write_frame, Stimulus, StreamingBackend};
use super::DataStoreType;

const CHANNEL_STRIDE: usize = 0x100;

// Extended stimulus packet types
const G_D: usize = 0x18;
const G_FLAG: usize = 0x68;

const SPER: usize = 0xe00;
const TCSR: usize = 0xe80;
const TCSR_TRACEID_MASK: u32 = 0x7f_0000;
const TCSR_TRACEID_SHIFT: u32 = 16;
const TCSR_EN: u32 = 1 << 0;

/// Where the STM lives and which channels to use.
#[derive(Debug, Clone, Copy)]
pub struct StmConfig {
    /// Base address of the extended stimulus ports.
    pub stimulus_ports: usize,
    /// Base address of the configuration registers. When absent the STM is
    /// assumed to be set up already.
    pub configuration_registers: Option<usize>,
    /// First channel used.
    pub min_channel: u16,
    /// Number of channels used.
    pub channels: u16,
    /// Trace ID to program, or keep the current one.
    pub trace_id: Option<u8>,
}

/// The System Trace Macrocell.
///
/// Frames are delimited by guaranteed flag packets; data goes out as
/// guaranteed data packets.
#[derive(Debug)]
pub struct Stm {
    config: StmConfig,
}

impl Stm {
    /// # Safety
    ///
    /// The addresses in `config` must map the STM of the target for the life
    /// of the store.
    pub unsafe fn new(config: StmConfig) -> Self {
        Self { config }
    }
}

impl StreamingBackend for Stm {
    fn init(&self) -> Result<(), Error> {
        if self.config.stimulus_ports == 0 || self.config.channels == 0 {
            return Err(new_error(ErrorKind::StoreInit));
        }

        if let Some(base) = self.config.configuration_registers {
            unsafe {
                unlock(base);

                // All ports; a user wanting fewer configures the STM itself
                write32(base + SPER, !0);

                let trace_id = self.config.trace_id;
                modify32(base + TCSR, |mut tcsr| {
                    if let Some(id) = trace_id {
                        tcsr &= !TCSR_TRACEID_MASK;
                        tcsr |= ((id as u32) << TCSR_TRACEID_SHIFT) & TCSR_TRACEID_MASK;
                    }
                    tcsr | TCSR_EN
                });
            }
        }

        Ok(())
    }

    fn write_frame(&self, data: &[u8], channel: u16, flush: bool) {
        let channel = (self.config.min_channel + channel) as usize;
        let mut stimulus = ExtendedStimulus(self.config.stimulus_ports + channel * CHANNEL_STRIDE);
        write_frame(&mut stimulus, data, flush);
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn data_store_type(&self) -> DataStoreType {
        DataStoreType::Stm
    }
}

struct ExtendedStimulus(usize);

impl Stimulus for ExtendedStimulus {
    fn marker(&mut self) {
        unsafe { write8(self.0 + G_FLAG, 0) };
    }

    fn byte(&mut self, value: u8) {
        unsafe { write8(self.0 + G_D, value) };
    }

    fn word(&mut self, value: u32) {
        unsafe { write32(self.0 + G_D, value) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_configuration_registers() {
        let mut ports = vec![0u32; 4];
        let mut regs = vec![0u32; 0x1000 / 4];
        regs[TCSR / 4] = 0x7f_0000;

        let stm = unsafe {
            Stm::new(StmConfig {
                stimulus_ports: ports.as_mut_ptr() as usize,
                configuration_registers: Some(regs.as_mut_ptr() as usize),
                min_channel: 0,
                channels: 4,
                trace_id: Some(3),
            })
        };
        stm.init().expect("init");

        assert_eq!(regs[0xfb0 / 4], 0xc5ac_ce55);
        assert_eq!(regs[SPER / 4], !0);
        assert_eq!(regs[TCSR / 4], 3 << 16 | TCSR_EN);
    }

    #[test]
    fn test_init_without_stimulus_ports() {
        let stm = unsafe {
            Stm::new(StmConfig {
                stimulus_ports: 0,
                configuration_registers: None,
                min_channel: 0,
                channels: 1,
                trace_id: None,
            })
        };
        let err = stm.init().expect_err("no ports");
        assert_eq!(err.kind(), &ErrorKind::StoreInit);
    }

    #[test]
    fn test_frame_packets() {
        // Two channels of extended stimulus space
        let mut ports = vec![0u32; 2 * CHANNEL_STRIDE / 4];
        ports.iter_mut().for_each(|p| *p = 0xaaaa_aaaa);

        let stm = unsafe {
            Stm::new(StmConfig {
                stimulus_ports: ports.as_mut_ptr() as usize,
                configuration_registers: None,
                min_channel: 1,
                channels: 1,
                trace_id: None,
            })
        };
        stm.init().expect("init");

        let word = [0x0403_0201u32];
        let data = unsafe { std::slice::from_raw_parts(word.as_ptr() as *const u8, 4) };
        stm.write_frame(data, 0, true);

        let channel = CHANNEL_STRIDE / 4;
        assert_eq!(ports[channel + G_D / 4], u32::from_le_bytes([1, 2, 3, 4]));
        assert_eq!(ports[channel + G_FLAG / 4] & 0xff, 0);

        // Channel 0 untouched
        assert!(ports[..channel].iter().all(|p| *p == 0xaaaa_aaaa));
    }
}
