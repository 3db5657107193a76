//! CPU Status Register (P register) flags.
//!
//! The 6502 status register is an 8-bit register that contains various flags
//! reflecting the state of the processor:
//!
//! ```text
//! 7  6  5  4  3  2  1  0
//! N  V  U  B  D  I  Z  C
//! │  │  │  │  │  │  │  └─ Carry
//! │  │  │  │  │  │  └──── Zero
//! │  │  │  │  │  └─────── Interrupt Disable
//! │  │  │  │  └────────── Decimal Mode (not used in NES but still functional)
//! │  │  │  └───────────── Break (1 when pushed from PHP/BRK, 0 from IRQ/NMI)
//! │  │  └──────────────── Unused (always 1 when pushed to stack)
//! │  └─────────────────── Overflow
//! └────────────────────── Negative
//! ```

use bitflags::bitflags;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

bitflags! {
    /// CPU Status Register flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct StatusFlags: u8 {
        /// Carry flag - Set if the last operation caused an overflow from bit 7
        /// or an underflow from bit 0.
        const CARRY = 1 << 0;

        /// Zero flag - Set if the result of the last operation was zero.
        const ZERO = 1 << 1;

        /// Interrupt Disable flag - When set, IRQ interrupts are disabled.
        /// NMI interrupts are not affected.
        const INTERRUPT_DISABLE = 1 << 2;

        /// Decimal Mode flag - When set, arithmetic operations use BCD.
        /// Note: The NES CPU lacks BCD support, but this flag still functions.
        const DECIMAL = 1 << 3;

        /// Break flag - Distinguishes hardware interrupts from BRK instructions.
        /// Set to 1 when pushed by PHP or BRK, 0 when pushed by IRQ or NMI.
        const BREAK = 1 << 4;

        /// Unused flag - Always set to 1 when status is pushed to the stack.
        const UNUSED = 1 << 5;

        /// Overflow flag - Set if the last operation caused a signed overflow.
        const OVERFLOW = 1 << 6;

        /// Negative flag - Set if bit 7 of the result is set.
        const NEGATIVE = 1 << 7;
    }
}

impl StatusFlags {
    /// Initial status after power-on.
    /// `INTERRUPT_DISABLE` is set, `UNUSED` is always 1.
    pub const POWER_ON: Self = Self::INTERRUPT_DISABLE.union(Self::UNUSED);

    /// Mask for flags that can be set by the PLP instruction.
    /// The BREAK and UNUSED flags are not affected by PLP.
    pub const PLP_MASK: Self = Self::CARRY
        .union(Self::ZERO)
        .union(Self::INTERRUPT_DISABLE)
        .union(Self::DECIMAL)
        .union(Self::OVERFLOW)
        .union(Self::NEGATIVE);

    /// Creates a new status register with default flags (`INTERRUPT_DISABLE`
    /// and `UNUSED` set).
    #[must_use]
    pub const fn new() -> Self {
        Self::POWER_ON
    }

    /// Sets or clears the Zero and Negative flags based on a value.
    #[inline]
    pub fn set_zn(&mut self, value: u8) {
        self.set_flag(Self::ZERO, value == 0);
        self.set_flag(Self::NEGATIVE, value & 0x80 != 0);
    }

    /// Sets or clears a flag.
    #[inline]
    pub fn set_flag(&mut self, flag: Self, value: bool) {
        if value {
            *self |= flag;
        } else {
            *self &= !flag;
        }
    }

    /// Converts the status register to a byte for pushing to the stack.
    /// The UNUSED flag is always set when pushing.
    #[inline]
    #[must_use]
    pub const fn to_stack_byte(self, brk: bool) -> u8 {
        let mut value = self.bits() | Self::UNUSED.bits();
        if brk {
            value |= Self::BREAK.bits();
        }
        value
    }

    /// Creates a status register from a byte pulled from the stack.
    /// The BREAK flag is ignored and UNUSED is always set.
    #[inline]
    #[must_use]
    pub fn from_stack_byte(value: u8) -> Self {
        Self::from_bits_truncate((value & !Self::BREAK.bits()) | Self::UNUSED.bits())
    }
}
