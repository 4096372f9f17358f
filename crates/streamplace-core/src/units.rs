//! Integer quantity newtypes: bytes, bandwidths, and latencies.
//!
//! Each unit is a `u64` wrapper with the arithmetic the placement pipeline
//! performs on it (summing bandwidths, comparing cut costs, accumulating
//! delays) and a suffixed display form. Serde keeps the wire shape a plain
//! number.

macro_rules! unit {
    ($name: ident, $suffix: literal) => {
        #[allow(missing_docs)]
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialOrd,
            Ord,
            PartialEq,
            Eq,
            derive_more::Add,
            derive_more::Sub,
            derive_more::AddAssign,
            derive_more::SubAssign,
            derive_more::Sum,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const ZERO: $name = Self::new(0);
            pub const ONE: $name = Self::new(1);

            /// Wraps a raw value.
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// The raw value.
            pub const fn into_u64(self) -> u64 {
                self.0
            }

            /// The raw value as a float, for the latency share formulas.
            pub const fn into_f64(self) -> f64 {
                self.0 as f64
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", self.0, $suffix)
            }
        }
    };
}

unit!(Bytes, "B");
unit!(Mbps, "Mbps");
unit!(BitsPerSec, "bps");
unit!(Millisecs, "ms");

impl From<Mbps> for BitsPerSec {
    fn from(val: Mbps) -> Self {
        Self::new(val.into_u64() * 1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbps_to_bps() {
        assert_eq!(BitsPerSec::from(Mbps::new(40)), BitsPerSec::new(40_000_000));
    }

    #[test]
    fn units_display_with_suffix() {
        assert_eq!(Bytes::new(512).to_string(), "512B");
        assert_eq!(Millisecs::new(3).to_string(), "3ms");
    }
}
