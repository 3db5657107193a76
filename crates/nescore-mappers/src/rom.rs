//! NES ROM file format parsing (iNES and NES 2.0).
//!
//! This module handles loading and parsing NES ROM files in both the legacy iNES format
//! and the extended NES 2.0 format.

use crate::Mirroring;

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

/// Errors that can occur when parsing NES ROM files.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RomError {
    /// ROM file is too small to contain a valid header.
    #[error("ROM file too small: expected at least 16 bytes, got {0}")]
    FileTooSmall(usize),

    /// Invalid iNES magic number in header.
    #[error("Invalid iNES magic number: expected [4E 45 53 1A], got {0:02X?}")]
    InvalidMagic([u8; 4]),

    /// Invalid PRG-ROM size.
    #[error("Invalid PRG-ROM size: {0}")]
    InvalidPrgSize(String),

    /// ROM file size doesn't match header specifications.
    #[error("ROM file size mismatch: expected {expected} bytes, got {actual} bytes")]
    SizeMismatch {
        /// Expected file size in bytes.
        expected: usize,
        /// Actual file size in bytes.
        actual: usize,
    },

    /// No mapper implementation is registered for this mapper number.
    #[error("Unsupported mapper: {0}")]
    UnsupportedMapper(u16),
}

/// Which header dialect a ROM was parsed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomFormat {
    /// Legacy iNES 1.0 header.
    INes,
    /// Extended NES 2.0 header (identifier bits 0x0C == 0x08 in byte 7).
    Nes20,
}

/// iNES/NES 2.0 ROM header.
///
/// # Format
///
/// ```text
/// Byte 0-3:   Magic number "NES" followed by MS-DOS EOF (0x4E 0x45 0x53 0x1A)
/// Byte 4:     PRG-ROM size in 16KB units (or LSB in NES 2.0)
/// Byte 5:     CHR-ROM size in 8KB units (or LSB in NES 2.0)
/// Byte 6:     Flags 6 (mirroring, battery, trainer, four-screen, mapper low nibble)
/// Byte 7:     Flags 7 (VS System, PlayChoice-10, NES 2.0 identifier, mapper high nibble)
/// Byte 8:     Flags 8 (mapper MSB and submapper in NES 2.0, or PRG-RAM size in iNES)
/// Byte 9:     Flags 9 (PRG-ROM MSB and CHR-ROM MSB in NES 2.0, TV system in iNES)
/// Byte 10:    Flags 10 (PRG-RAM and PRG-NVRAM size in NES 2.0)
/// Byte 11:    Flags 11 (CHR-RAM and CHR-NVRAM size in NES 2.0)
/// Byte 12:    Flags 12 (CPU/PPU timing in NES 2.0)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomHeader {
    /// Which header dialect produced this struct.
    pub format: RomFormat,

    /// iNES mapper number (0-4095 for NES 2.0, 0-255 for iNES 1.0).
    pub mapper: u16,

    /// Submapper number (0-15, NES 2.0 only).
    pub submapper: u8,

    /// PRG-ROM size in bytes.
    pub prg_rom_size: usize,

    /// CHR-ROM size in bytes (0 indicates CHR-RAM).
    pub chr_rom_size: usize,

    /// PRG-RAM size in bytes (volatile work RAM, not battery-backed).
    pub prg_ram_size: usize,

    /// Battery-backed PRG-NVRAM size in bytes (NES 2.0 only; iNES reports this via `prg_ram_size`).
    pub prg_nvram_size: usize,

    /// CHR-RAM size in bytes (when `chr_rom_size` is 0).
    pub chr_ram_size: usize,

    /// CHR-NVRAM size in bytes (NES 2.0 only).
    pub chr_nvram_size: usize,

    /// Nametable mirroring mode.
    pub mirroring: Mirroring,

    /// Battery-backed PRG-RAM present.
    pub has_battery: bool,

    /// 512-byte trainer present before PRG-ROM.
    pub has_trainer: bool,

    /// TV system: 0 = NTSC, 1 = PAL, 2 = dual compatible.
    pub tv_system: u8,
}

impl RomHeader {
    /// iNES magic number: "NES" followed by MS-DOS EOF.
    const MAGIC: [u8; 4] = [0x4E, 0x45, 0x53, 0x1A];

    /// Parse ROM header from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too short, the magic number doesn't
    /// match, or the header describes a zero-size PRG-ROM.
    #[allow(clippy::similar_names)]
    pub fn parse(data: &[u8]) -> Result<Self, RomError> {
        if data.len() < 16 {
            return Err(RomError::FileTooSmall(data.len()));
        }

        let magic = [data[0], data[1], data[2], data[3]];
        if magic != Self::MAGIC {
            return Err(RomError::InvalidMagic(magic));
        }

        let is_nes20 = (data[7] & 0x0C) == 0x08;
        let format = if is_nes20 {
            RomFormat::Nes20
        } else {
            RomFormat::INes
        };

        let (mapper, submapper) = if is_nes20 {
            Self::parse_nes2_mapper(data)
        } else {
            (Self::parse_ines_mapper(data), 0)
        };

        let (prg_rom_size, chr_rom_size) = if is_nes20 {
            Self::parse_nes2_sizes(data)?
        } else {
            Self::parse_ines_sizes(data)?
        };

        let mirroring = Self::parse_mirroring(data);
        let has_battery = (data[6] & 0x02) != 0;
        let has_trainer = (data[6] & 0x04) != 0;

        let (prg_ram_size, prg_nvram_size, chr_ram_size, chr_nvram_size, tv_system) = if is_nes20
        {
            let (prg_ram, prg_nvram, chr_ram, chr_nvram) = Self::parse_nes2_ram_sizes(data);
            (prg_ram, prg_nvram, chr_ram, chr_nvram, data[12] & 0x03)
        } else {
            let prg_ram = if data[8] == 0 {
                8192
            } else {
                data[8] as usize * 8192
            };
            let chr_ram = if chr_rom_size == 0 { 8192 } else { 0 };
            (prg_ram, 0, chr_ram, 0, data[9] & 0x01)
        };

        Ok(Self {
            format,
            mapper,
            submapper,
            prg_rom_size,
            chr_rom_size,
            prg_ram_size,
            prg_nvram_size,
            chr_ram_size,
            chr_nvram_size,
            mirroring,
            has_battery,
            has_trainer,
            tv_system,
        })
    }

    /// Parse iNES 1.0 mapper number (8 bits).
    fn parse_ines_mapper(data: &[u8]) -> u16 {
        let low = (data[6] & 0xF0) >> 4;
        let high = data[7] & 0xF0;
        u16::from(high | low)
    }

    /// Parse NES 2.0 mapper number (12 bits) and submapper (4 bits).
    fn parse_nes2_mapper(data: &[u8]) -> (u16, u8) {
        let low = (data[6] & 0xF0) >> 4;
        let mid = data[7] & 0xF0;
        let high = data[8] & 0x0F;
        let mapper = u16::from(high) << 8 | u16::from(mid | low);
        let submapper = (data[8] & 0xF0) >> 4;
        (mapper, submapper)
    }

    /// Parse iNES 1.0 ROM sizes.
    fn parse_ines_sizes(data: &[u8]) -> Result<(usize, usize), RomError> {
        let prg_size = data[4] as usize * 16384;
        let chr_size = data[5] as usize * 8192;

        if prg_size == 0 {
            return Err(RomError::InvalidPrgSize(
                "PRG-ROM size cannot be 0".to_string(),
            ));
        }

        Ok((prg_size, chr_size))
    }

    /// Parse NES 2.0 ROM sizes with MSB / exponent-multiplier support.
    #[allow(clippy::similar_names)]
    fn parse_nes2_sizes(data: &[u8]) -> Result<(usize, usize), RomError> {
        let prg_lsb = data[4] as usize;
        let chr_lsb = data[5] as usize;
        let prg_msb = (data[9] & 0x0F) as usize;
        let chr_msb = ((data[9] & 0xF0) >> 4) as usize;

        let prg_size = if prg_msb == 0x0F {
            let exponent = (prg_lsb & 0xFC) >> 2;
            let multiplier = (prg_lsb & 0x03) * 2 + 1;
            multiplier * (1 << exponent)
        } else {
            (prg_msb << 8 | prg_lsb) * 16384
        };

        let chr_size = if chr_msb == 0x0F {
            let exponent = (chr_lsb & 0xFC) >> 2;
            let multiplier = (chr_lsb & 0x03) * 2 + 1;
            multiplier * (1 << exponent)
        } else {
            (chr_msb << 8 | chr_lsb) * 8192
        };

        if prg_size == 0 {
            return Err(RomError::InvalidPrgSize(
                "PRG-ROM size cannot be 0".to_string(),
            ));
        }

        Ok((prg_size, chr_size))
    }

    /// Parse mirroring mode from flags.
    fn parse_mirroring(data: &[u8]) -> Mirroring {
        if (data[6] & 0x08) != 0 {
            Mirroring::FourScreen
        } else if (data[6] & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        }
    }

    /// Parse NES 2.0 RAM sizes.
    fn parse_nes2_ram_sizes(data: &[u8]) -> (usize, usize, usize, usize) {
        let prg_ram = Self::parse_ram_size(data[10] & 0x0F);
        let prg_nvram = Self::parse_ram_size((data[10] & 0xF0) >> 4);
        let chr_ram = Self::parse_ram_size(data[11] & 0x0F);
        let chr_nvram = Self::parse_ram_size((data[11] & 0xF0) >> 4);
        (prg_ram, prg_nvram, chr_ram, chr_nvram)
    }

    /// Parse RAM size from 4-bit field (NES 2.0 format): `64 << field`, 0 if field is 0.
    fn parse_ram_size(field: u8) -> usize {
        if field == 0 { 0 } else { 64 << field }
    }
}

/// Parsed NES ROM file.
#[derive(Debug, Clone)]
pub struct Rom {
    /// ROM header information.
    pub header: RomHeader,

    /// 512-byte trainer data (if present).
    pub trainer: Option<Vec<u8>>,

    /// PRG-ROM data (program code).
    pub prg_rom: Vec<u8>,

    /// CHR-ROM data (graphics), or empty if CHR-RAM.
    pub chr_rom: Vec<u8>,
}

impl Rom {
    /// Load a ROM from raw file bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid or the file is truncated
    /// relative to what the header declares.
    pub fn load(data: &[u8]) -> Result<Self, RomError> {
        let header = RomHeader::parse(data)?;

        let mut offset = 16;

        let trainer = if header.has_trainer {
            if data.len() < offset + 512 {
                return Err(RomError::FileTooSmall(data.len()));
            }
            let trainer_data = data[offset..offset + 512].to_vec();
            offset += 512;
            Some(trainer_data)
        } else {
            None
        };

        if data.len() < offset + header.prg_rom_size {
            return Err(RomError::SizeMismatch {
                expected: offset + header.prg_rom_size,
                actual: data.len(),
            });
        }
        let prg_rom = data[offset..offset + header.prg_rom_size].to_vec();
        offset += header.prg_rom_size;

        let chr_rom = if header.chr_rom_size > 0 {
            if data.len() < offset + header.chr_rom_size {
                return Err(RomError::SizeMismatch {
                    expected: offset + header.chr_rom_size,
                    actual: data.len(),
                });
            }

            data[offset..offset + header.chr_rom_size].to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            header,
            trainer,
            prg_rom,
            chr_rom,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_header(
        prg_size: u8,
        chr_size: u8,
        mapper: u8,
        mirroring: u8,
        battery: bool,
    ) -> Vec<u8> {
        let mut header = vec![0x4E, 0x45, 0x53, 0x1A];
        header.push(prg_size);
        header.push(chr_size);
        header.push(((mapper & 0x0F) << 4) | mirroring | if battery { 0x02 } else { 0x00 });
        header.push(mapper & 0xF0);
        header.extend_from_slice(&[0; 8]);
        header
    }

    #[test]
    fn test_valid_ines_header() {
        let header = create_test_header(2, 1, 0, 0, false);
        let parsed = RomHeader::parse(&header).unwrap();
        assert_eq!(parsed.prg_rom_size, 32768);
        assert_eq!(parsed.chr_rom_size, 8192);
        assert_eq!(parsed.mapper, 0);
        assert_eq!(parsed.mirroring, Mirroring::Horizontal);
        assert!(!parsed.has_battery);
        assert_eq!(parsed.format, RomFormat::INes);
    }

    #[test]
    fn test_invalid_magic() {
        let mut header = create_test_header(1, 1, 0, 0, false);
        header[0] = 0x00;
        let result = RomHeader::parse(&header);
        assert!(matches!(result, Err(RomError::InvalidMagic(_))));
    }

    #[test]
    fn test_file_too_small() {
        let result = RomHeader::parse(&[0x4E, 0x45, 0x53]);
        assert!(matches!(result, Err(RomError::FileTooSmall(3))));
    }

    #[test]
    fn test_mapper_number_parsing() {
        let header = create_test_header(1, 1, 0x42, 0, false);
        let parsed = RomHeader::parse(&header).unwrap();
        assert_eq!(parsed.mapper, 0x42);
    }

    #[test]
    fn test_mirroring_modes() {
        let header = create_test_header(1, 1, 0, 0x00, false);
        assert_eq!(
            RomHeader::parse(&header).unwrap().mirroring,
            Mirroring::Horizontal
        );

        let header = create_test_header(1, 1, 0, 0x01, false);
        assert_eq!(
            RomHeader::parse(&header).unwrap().mirroring,
            Mirroring::Vertical
        );

        let header = create_test_header(1, 1, 0, 0x08, false);
        assert_eq!(
            RomHeader::parse(&header).unwrap().mirroring,
            Mirroring::FourScreen
        );
    }

    #[test]
    fn test_battery_flag() {
        let header = create_test_header(1, 1, 0, 0, true);
        let parsed = RomHeader::parse(&header).unwrap();
        assert!(parsed.has_battery);
    }

    #[test]
    fn test_rom_loading() {
        let mut rom_data = create_test_header(1, 1, 0, 0, false);
        rom_data.extend_from_slice(&[0x42; 16384]);
        rom_data.extend_from_slice(&[0x55; 8192]);

        let rom = Rom::load(&rom_data).unwrap();
        assert_eq!(rom.header.prg_rom_size, 16384);
        assert_eq!(rom.header.chr_rom_size, 8192);
        assert_eq!(rom.prg_rom.len(), 16384);
        assert_eq!(rom.chr_rom.len(), 8192);
        assert_eq!(rom.prg_rom[0], 0x42);
        assert_eq!(rom.chr_rom[0], 0x55);
    }

    #[test]
    fn test_rom_with_trainer() {
        let mut header = create_test_header(1, 0, 0, 0, false);
        header[6] |= 0x04;

        let mut rom_data = header;
        rom_data.extend_from_slice(&[0xFF; 512]);
        rom_data.extend_from_slice(&[0x42; 16384]);

        let rom = Rom::load(&rom_data).unwrap();
        assert!(rom.header.has_trainer);
        assert!(rom.trainer.is_some());
        assert_eq!(rom.trainer.unwrap().len(), 512);
    }

    #[test]
    fn test_rom_size_mismatch() {
        let mut rom_data = create_test_header(2, 1, 0, 0, false);
        rom_data.extend_from_slice(&[0x42; 1024]);
        let result = Rom::load(&rom_data);
        assert!(matches!(result, Err(RomError::SizeMismatch { .. })));
    }

    #[test]
    fn test_nes20_identifier() {
        let mut header = create_test_header(1, 1, 0, 0, false);
        header[7] |= 0x08;
        let parsed = RomHeader::parse(&header).unwrap();
        assert_eq!(parsed.format, RomFormat::Nes20);
    }
}
