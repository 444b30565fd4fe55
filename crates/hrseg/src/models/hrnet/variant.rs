//! # `HRNet` Width Schedules

use crate::error::HrSegError;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// The maximum number of parallel resolution branches.
pub const MAX_BRANCHES: usize = 4;

/// Channel widths of the 1/4, 1/8, 1/16 and 1/32 resolution branches.
pub type WidthSchedule = [usize; MAX_BRANCHES];

/// A named `HRNet` width schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HrNetVariant {
    /// ``hrnet_w18``: `[18, 36, 72, 144]`.
    W18,

    /// ``hrnet_w32``: `[32, 64, 128, 256]`.
    W32,

    /// ``hrnet_w48``: `[48, 96, 192, 384]`.
    #[default]
    W48,
}

impl HrNetVariant {
    /// All known variants.
    pub const ALL: [HrNetVariant; 3] = [Self::W18, Self::W32, Self::W48];

    /// The per-branch channel widths.
    pub fn widths(self) -> WidthSchedule {
        let base = self.base_width();
        [base, base * 2, base * 4, base * 8]
    }

    /// The width of the highest-resolution branch.
    pub fn base_width(self) -> usize {
        match self {
            Self::W18 => 18,
            Self::W32 => 32,
            Self::W48 => 48,
        }
    }

    /// The canonical name, as accepted by [`HrNetVariant::from_str`].
    pub fn name(self) -> &'static str {
        match self {
            Self::W18 => "hrnet_w18",
            Self::W32 => "hrnet_w32",
            Self::W48 => "hrnet_w48",
        }
    }
}

impl fmt::Display for HrNetVariant {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HrNetVariant {
    type Err = HrSegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|variant| variant.name() == s)
            .ok_or_else(|| HrSegError::UnsupportedVariant(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hamcrest::prelude::*;

    #[test]
    fn test_widths() {
        assert_eq!(HrNetVariant::W18.widths(), [18, 36, 72, 144]);
        assert_eq!(HrNetVariant::W32.widths(), [32, 64, 128, 256]);
        assert_eq!(HrNetVariant::W48.widths(), [48, 96, 192, 384]);
        assert_eq!(HrNetVariant::default(), HrNetVariant::W48);
    }

    #[test]
    fn test_parse() {
        for variant in HrNetVariant::ALL {
            assert_that!(variant.to_string().parse::<HrNetVariant>(), equal_to(Ok(variant)));
        }

        assert_that!(
            "hrnet_w64".parse::<HrNetVariant>(),
            equal_to(Err(HrSegError::UnsupportedVariant("hrnet_w64".to_string())))
        );
        assert_that!(
            "HRNET_W18".parse::<HrNetVariant>(),
            equal_to(Err(HrSegError::UnsupportedVariant("HRNET_W18".to_string())))
        );
    }
}
