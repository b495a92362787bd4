//! Modulation/coding schemes selectable by a single integer mode.

use serde::Serialize;

use crate::error::FramingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modulation {
    Bpsk,
    Qpsk,
    Qam16,
    Qam32,
    Qam64,
    Qam128,
    Qam256,
}

impl Modulation {
    pub fn bits_per_symbol(&self) -> u32 {
        match self {
            Modulation::Bpsk => 1,
            Modulation::Qpsk => 2,
            Modulation::Qam16 => 4,
            Modulation::Qam32 => 5,
            Modulation::Qam64 => 6,
            Modulation::Qam128 => 7,
            Modulation::Qam256 => 8,
        }
    }
}

/// Forward error correction codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fec {
    None,
    /// Golay(24,12)
    Golay2412,
    /// Hamming(12,8)
    Hamming128,
    /// SEC-DED(72,64)
    Secded7264,
}

impl Fec {
    /// Code rate as (data bits, coded bits).
    pub fn rate(&self) -> (u32, u32) {
        match self {
            Fec::None => (1, 1),
            Fec::Golay2412 => (12, 24),
            Fec::Hamming128 => (8, 12),
            Fec::Secded7264 => (64, 72),
        }
    }
}

/// Frame integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    None,
    Crc32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Scheme {
    pub mode: u32,
    pub modulation: Modulation,
    pub fec: Fec,
    pub name: &'static str,
}

pub const SCHEMES: [Scheme; 12] = [
    Scheme {
        mode: 0,
        modulation: Modulation::Bpsk,
        fec: Fec::Golay2412,
        name: "r1/2 BPSK",
    },
    Scheme {
        mode: 1,
        modulation: Modulation::Bpsk,
        fec: Fec::Hamming128,
        name: "r2/3 BPSK",
    },
    Scheme {
        mode: 2,
        modulation: Modulation::Qpsk,
        fec: Fec::Golay2412,
        name: "r1/2 QPSK",
    },
    Scheme {
        mode: 3,
        modulation: Modulation::Qpsk,
        fec: Fec::Hamming128,
        name: "r2/3 QPSK",
    },
    Scheme {
        mode: 4,
        modulation: Modulation::Qpsk,
        fec: Fec::Secded7264,
        name: "r8/9 QPSK",
    },
    Scheme {
        mode: 5,
        modulation: Modulation::Qam16,
        fec: Fec::Hamming128,
        name: "r2/3 16-QAM",
    },
    Scheme {
        mode: 6,
        modulation: Modulation::Qam16,
        fec: Fec::Secded7264,
        name: "r8/9 16-QAM",
    },
    Scheme {
        mode: 7,
        modulation: Modulation::Qam32,
        fec: Fec::Secded7264,
        name: "r8/9 32-QAM",
    },
    Scheme {
        mode: 8,
        modulation: Modulation::Qam64,
        fec: Fec::Secded7264,
        name: "r8/9 64-QAM",
    },
    Scheme {
        mode: 9,
        modulation: Modulation::Qam128,
        fec: Fec::Secded7264,
        name: "r8/9 128-QAM",
    },
    Scheme {
        mode: 10,
        modulation: Modulation::Qam256,
        fec: Fec::Secded7264,
        name: "r8/9 256-QAM",
    },
    Scheme {
        mode: 11,
        modulation: Modulation::Qam256,
        fec: Fec::None,
        name: "uncoded 256-QAM",
    },
];

impl Scheme {
    pub fn lookup(mode: u32) -> Result<&'static Scheme, FramingError> {
        SCHEMES
            .iter()
            .find(|s| s.mode == mode)
            .ok_or(FramingError::UnknownScheme(mode))
    }

    /// Payload bits carried per subcarrier symbol after coding.
    pub fn spectral_efficiency(&self) -> f64 {
        let (data, coded) = self.fec.rate();
        f64::from(self.modulation.bits_per_symbol()) * f64::from(data) / f64::from(coded)
    }
}

/// Generator properties derived from a scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameProps {
    pub check: Check,
    pub inner_fec: Fec,
    pub outer_fec: Fec,
    pub modulation: Modulation,
}

impl From<&Scheme> for FrameProps {
    fn from(scheme: &Scheme) -> Self {
        Self {
            check: Check::Crc32,
            inner_fec: Fec::None,
            outer_fec: scheme.fec,
            modulation: scheme.modulation,
        }
    }
}
