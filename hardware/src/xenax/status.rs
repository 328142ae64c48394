//! XENAX process status register (`TPSR`).

use bitflags::bitflags;

bitflags! {
    /// Bits of the 32-bit process status register.
    ///
    /// The controller reports the register as a hexadecimal string. Bits above
    /// 26 are reserved and kept as-is when parsing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProcessStatus: u32 {
        /// Entry in the error queue.
        const ERROR                     = 1 << 0;
        /// Axis is referenced.
        const REF                       = 1 << 1;
        const IN_MOTION                 = 1 << 2;
        const IN_POSITION               = 1 << 3;
        const END_OF_PROGRAM            = 1 << 4;
        const IN_FORCE                  = 1 << 5;
        const IN_SECTOR                 = 1 << 6;
        const FORCE_IN_SECTOR           = 1 << 7;
        const INVERTER_VOLTAGE          = 1 << 8;
        const END_OF_GANTRY_INIT        = 1 << 9;
        const NEGATIVE_LIMIT_SWITCH     = 1 << 10;
        const POSITIVE_LIMIT_SWITCH     = 1 << 11;
        const REMAIN_POWER_ON           = 1 << 12;
        const POWER_OFF                 = 1 << 13;
        /// Set once a force calibration (`FC`) has completed.
        const FORCE_CALIBRATION_ACTIVE  = 1 << 14;
        const I_FORCE_LIMIT_REACHED     = 1 << 15;
        const STO_PRIMED_HIT            = 1 << 16;
        const SS1_PRIMED_HIT            = 1 << 17;
        const SS2_PRIMED                = 1 << 18;
        const SS2_HIT                   = 1 << 19;
        const SLS_PRIMED                = 1 << 20;
        const SLS_SPEED_HIT             = 1 << 21;
        const SLS_POSITION_HIT          = 1 << 22;
        const WARNING                   = 1 << 23;
        const INFO                      = 1 << 24;
        const PHASING_DONE              = 1 << 25;
        const I_FORCE_DRIFT_COMP_ACTIVE = 1 << 26;
    }
}

impl ProcessStatus {
    /// Bits that mean something is waiting in the error queue.
    pub const ATTENTION_MASK: Self = Self::from_bits_truncate(
        Self::ERROR.bits() | Self::WARNING.bits() | Self::INFO.bits(),
    );

    /// Parse the hexadecimal `TPSR` payload.
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        u32::from_str_radix(s, 16).ok().map(Self::from_bits_retain)
    }

    /// True if an error, warning or info entry is pending.
    #[inline]
    pub const fn error_pending(&self) -> bool {
        self.intersects(Self::ATTENTION_MASK)
    }
}
