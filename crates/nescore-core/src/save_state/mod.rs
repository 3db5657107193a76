//! Save state system for `NesCore` emulator.
//!
//! This module provides instant save/load functionality for complete emulator state,
//! enabling features like rewind, TAS recording, and quick save/load.
//!
//! # Format
//!
//! Save states use a custom binary format with the following structure:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ Header (32 bytes)                   │
//! │  - Magic: "RNES"          (4 bytes) │
//! │  - Version: u32           (4 bytes) │
//! │  - Checksum: CRC32        (4 bytes) │
//! │  - ROM hash: CRC32        (4 bytes) │
//! │  - Frame count: u64       (8 bytes) │
//! │  - Payload length: u64    (8 bytes) │
//! ├─────────────────────────────────────┤
//! │ State Data (variable)               │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use nescore_core::Console;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rom = std::fs::read("game.nes")?;
//! let mut console = Console::from_rom_bytes(&rom)?;
//!
//! for _ in 0..1000 {
//!     console.step_frame();
//! }
//!
//! let bytes = console.save_state()?;
//!
//! for _ in 0..500 {
//!     console.step_frame();
//! }
//!
//! console.load_state(&bytes)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Scope
//!
//! A save state captures every piece of architectural state that future
//! execution can observe: CPU registers and the jammed/stall/NMI-edge
//! bookkeeping around them, system RAM, controller shift registers, the full
//! PPU (scroll/address latches, palette and nametable VRAM, OAM and
//! secondary OAM, the in-flight background and sprite pipeline shift
//! registers, and the scanline/dot/frame counters), the full APU (all four
//! channels, the frame counter, and the DMC's sample reader), mapper-internal
//! banking and IRQ registers, mapper battery RAM, and both cycle counters
//! (`NesBus`'s CPU-cycle parity counter and `Console`'s total-cycle counter).
//! The cycle counters matter beyond bookkeeping: `$4014` OAM DMA costs 513 or
//! 514 CPU cycles depending on whether the cycle count at the time of the
//! write is even or odd, so restoring the parity exactly is required for a
//! loaded state to behave identically to the moment it was saved.
//!
//! The rendered framebuffer and the queued audio samples are not part of the
//! state. Both are derived output, not state the CPU, PPU, or APU consult —
//! the framebuffer is fully repainted by the next completed frame, and the
//! audio buffer is refilled by the next `step`/`step_frame` call.

pub mod error;

#[cfg(not(feature = "std"))]
use alloc::{string::ToString, vec::Vec};

use crate::console::{Console, ConsoleError};
pub use error::SaveStateError;
use nescore_cpu::CpuRegisters;

/// Save state format version
pub const SAVE_STATE_VERSION: u32 = 1;

/// Magic bytes for save state files
pub const SAVE_STATE_MAGIC: &[u8; 4] = b"RNES";

/// Header size in bytes, preceding the variable-length state payload.
const HEADER_LEN: usize = 4 + 4 + 4 + 4 + 8 + 8;

/// Everything a save state needs to reconstruct a running [`Console`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveState {
    /// Frame counter at the time of the save.
    pub frame_count: u64,
    /// CRC32 over PRG+CHR ROM, used to reject mismatched-ROM loads.
    pub rom_crc32: u32,
    /// CPU architectural registers.
    pub cpu: CpuRegisters,
    /// 2 KiB system RAM.
    pub ram: [u8; 2048],
    /// Controller 1 shift register (bits not yet read out via $4016).
    pub controller1_shift: u8,
    /// Controller 2 shift register (bits not yet read out via $4017).
    pub controller2_shift: u8,
    /// Mapper battery RAM, if the cartridge has any.
    pub battery_ram: Vec<u8>,
    /// Bincode-encoded [`nescore_ppu::PpuSnapshot`].
    pub ppu_state: Vec<u8>,
    /// Bincode-encoded [`nescore_apu::Apu`].
    pub apu_state: Vec<u8>,
    /// Mapper-internal banking/IRQ registers, from [`nescore_mappers::Mapper::save_state`].
    pub mapper_state: Vec<u8>,
    /// `NesBus`'s CPU-cycle counter, whose parity decides OAM DMA cost.
    pub bus_cpu_cycles: u64,
    /// `Console`'s total executed CPU cycle counter.
    pub total_cycles: u64,
}

impl SaveState {
    /// Capture a snapshot of `console`.
    ///
    /// # Errors
    ///
    /// Returns an error if the PPU or APU state fails to serialize.
    pub fn capture(console: &Console, rom_crc32: u32) -> Result<Self, SaveStateError> {
        let bus = console.bus();

        let ppu_state =
            bincode::serde::encode_to_vec(&bus.ppu.snapshot(), bincode::config::standard())
                .map_err(|e| SaveStateError::Compression(e.to_string()))?;
        let apu_state = bincode::serde::encode_to_vec(&bus.apu, bincode::config::standard())
            .map_err(|e| SaveStateError::Compression(e.to_string()))?;

        Ok(Self {
            frame_count: console.frame_count(),
            rom_crc32,
            cpu: console.cpu().registers(),
            ram: bus.ram,
            controller1_shift: bus.controller1_shift(),
            controller2_shift: bus.controller2_shift(),
            battery_ram: bus.mapper.battery_ram().map(<[u8]>::to_vec).unwrap_or_default(),
            ppu_state,
            apu_state,
            mapper_state: bus.mapper.save_state(),
            bus_cpu_cycles: bus.cpu_cycles(),
            total_cycles: console.total_cycles(),
        })
    }

    /// Encode into the on-disk binary format (header + payload).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(
            2048 + 32 + self.battery_ram.len() + self.ppu_state.len() + self.apu_state.len() + self.mapper_state.len(),
        );
        payload.extend_from_slice(&self.cpu.a.to_le_bytes());
        payload.extend_from_slice(&self.cpu.x.to_le_bytes());
        payload.extend_from_slice(&self.cpu.y.to_le_bytes());
        payload.extend_from_slice(&self.cpu.pc.to_le_bytes());
        payload.extend_from_slice(&self.cpu.sp.to_le_bytes());
        payload.push(self.cpu.status);
        payload.extend_from_slice(&self.cpu.cycles.to_le_bytes());
        payload.push(self.cpu.stall);
        payload.push(self.cpu.jammed as u8);
        payload.push(self.cpu.nmi_pending as u8);
        payload.push(self.cpu.prev_irq_inhibit as u8);
        payload.push(self.cpu.suppress_nmi_next as u8);
        payload.extend_from_slice(&self.ram);
        payload.push(self.controller1_shift);
        payload.push(self.controller2_shift);
        payload.extend_from_slice(&(self.battery_ram.len() as u32).to_le_bytes());
        payload.extend_from_slice(&self.battery_ram);
        payload.extend_from_slice(&(self.ppu_state.len() as u32).to_le_bytes());
        payload.extend_from_slice(&self.ppu_state);
        payload.extend_from_slice(&(self.apu_state.len() as u32).to_le_bytes());
        payload.extend_from_slice(&self.apu_state);
        payload.extend_from_slice(&(self.mapper_state.len() as u32).to_le_bytes());
        payload.extend_from_slice(&self.mapper_state);
        payload.extend_from_slice(&self.bus_cpu_cycles.to_le_bytes());
        payload.extend_from_slice(&self.total_cycles.to_le_bytes());

        let checksum = crc32fast::hash(&payload);

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(SAVE_STATE_MAGIC);
        out.extend_from_slice(&SAVE_STATE_VERSION.to_le_bytes());
        out.extend_from_slice(&checksum.to_le_bytes());
        out.extend_from_slice(&self.rom_crc32.to_le_bytes());
        out.extend_from_slice(&self.frame_count.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Decode a buffer produced by [`SaveState::encode`], verifying the magic,
    /// version, and checksum.
    pub fn decode(data: &[u8]) -> Result<Self, SaveStateError> {
        if data.len() < HEADER_LEN {
            return Err(SaveStateError::InsufficientData {
                needed: HEADER_LEN,
                available: data.len(),
            });
        }
        if &data[0..4] != SAVE_STATE_MAGIC {
            return Err(SaveStateError::InvalidMagic);
        }
        let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
        if version != SAVE_STATE_VERSION {
            return Err(SaveStateError::UnsupportedVersion(version));
        }
        let expected_checksum = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let rom_crc32 = u32::from_le_bytes(data[12..16].try_into().unwrap());
        let frame_count = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let payload_len = u64::from_le_bytes(data[24..32].try_into().unwrap()) as usize;

        let payload = &data[HEADER_LEN..];
        if payload.len() < payload_len {
            return Err(SaveStateError::InsufficientData {
                needed: payload_len,
                available: payload.len(),
            });
        }
        let payload = &payload[..payload_len];

        let actual_checksum = crc32fast::hash(payload);
        if actual_checksum != expected_checksum {
            return Err(SaveStateError::ChecksumMismatch {
                expected: expected_checksum,
                actual: actual_checksum,
            });
        }

        let mut cur = 0usize;
        let mut take = |n: usize| -> Result<&[u8], SaveStateError> {
            if cur + n > payload.len() {
                return Err(SaveStateError::InsufficientData {
                    needed: cur + n,
                    available: payload.len(),
                });
            }
            let s = &payload[cur..cur + n];
            cur += n;
            Ok(s)
        };

        let a = take(1)?[0];
        let x = take(1)?[0];
        let y = take(1)?[0];
        let pc = u16::from_le_bytes(take(2)?.try_into().unwrap());
        let sp = take(1)?[0];
        let status = take(1)?[0];
        let cycles = u64::from_le_bytes(take(8)?.try_into().unwrap());
        let stall = take(1)?[0];
        let jammed = take(1)?[0] != 0;
        let nmi_pending = take(1)?[0] != 0;
        let prev_irq_inhibit = take(1)?[0] != 0;
        let suppress_nmi_next = take(1)?[0] != 0;

        let mut ram = [0u8; 2048];
        ram.copy_from_slice(take(2048)?);

        let controller1_shift = take(1)?[0];
        let controller2_shift = take(1)?[0];

        let battery_len = u32::from_le_bytes(take(4)?.try_into().unwrap()) as usize;
        let battery_ram = take(battery_len)?.to_vec();

        let ppu_len = u32::from_le_bytes(take(4)?.try_into().unwrap()) as usize;
        let ppu_state = take(ppu_len)?.to_vec();

        let apu_len = u32::from_le_bytes(take(4)?.try_into().unwrap()) as usize;
        let apu_state = take(apu_len)?.to_vec();

        let mapper_len = u32::from_le_bytes(take(4)?.try_into().unwrap()) as usize;
        let mapper_state = take(mapper_len)?.to_vec();

        let bus_cpu_cycles = u64::from_le_bytes(take(8)?.try_into().unwrap());
        let total_cycles = u64::from_le_bytes(take(8)?.try_into().unwrap());

        Ok(Self {
            frame_count,
            rom_crc32,
            cpu: CpuRegisters {
                a,
                x,
                y,
                pc,
                sp,
                status,
                cycles,
                stall,
                jammed,
                nmi_pending,
                prev_irq_inhibit,
                suppress_nmi_next,
            },
            ram,
            controller1_shift,
            controller2_shift,
            battery_ram,
            ppu_state,
            apu_state,
            mapper_state,
            bus_cpu_cycles,
            total_cycles,
        })
    }

    /// Apply this state onto `console`, restoring CPU, RAM, controller,
    /// PPU, APU, mapper, and cycle-counter state. Does not re-create the
    /// mapper or change its ROM.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded PPU or APU snapshot fails to
    /// deserialize (e.g. it was produced by an incompatible build).
    pub fn restore(&self, console: &mut Console) -> Result<(), ConsoleError> {
        console.cpu_mut().restore_registers(self.cpu);

        let (ppu_snapshot, _): (nescore_ppu::PpuSnapshot, usize) =
            bincode::serde::decode_from_slice(&self.ppu_state, bincode::config::standard())
                .map_err(|e| ConsoleError::InvalidState(e.to_string()))?;
        let (apu, _): (nescore_apu::Apu, usize) =
            bincode::serde::decode_from_slice(&self.apu_state, bincode::config::standard())
                .map_err(|e| ConsoleError::InvalidState(e.to_string()))?;

        let bus = console.bus_mut();
        bus.ram = self.ram;
        bus.set_controller_shifts(self.controller1_shift, self.controller2_shift);
        if !self.battery_ram.is_empty() {
            bus.mapper.set_battery_ram(&self.battery_ram);
        }
        bus.mapper.load_state(&self.mapper_state);
        bus.ppu.restore_snapshot(&ppu_snapshot);
        bus.apu = apu;
        bus.set_cpu_cycles(self.bus_cpu_cycles);

        console.set_frame_count(self.frame_count);
        console.set_total_cycles(self.total_cycles);
        Ok(())
    }
}
