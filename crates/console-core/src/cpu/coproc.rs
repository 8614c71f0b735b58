//! Optional floating-point coprocessor.
//!
//! Float results are modeled in software: the operation is evaluated in
//! `f64`, then rounded to `f32` in the profile-selected direction. The wide
//! intermediate carries enough precision that the final single-precision
//! result is the correctly rounded one, so identical inputs produce identical
//! bits on every host.

/// Rounding direction applied when narrowing results to single precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RoundingMode {
    /// Round to nearest, ties to even.
    #[default]
    NearestEven,
    /// Round toward zero (truncate).
    TowardZero,
    /// Round toward positive infinity.
    TowardPositive,
    /// Round toward negative infinity.
    TowardNegative,
}

/// Canonical quiet-NaN bit pattern emitted for every NaN result.
pub const CANONICAL_NAN: u32 = 0x7FC0_0000;

/// Software float unit bound to one rounding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatUnit {
    mode: RoundingMode,
}

impl FloatUnit {
    /// Creates a unit with the given rounding mode.
    #[must_use]
    pub const fn new(mode: RoundingMode) -> Self {
        Self { mode }
    }

    /// The unit's rounding mode.
    #[must_use]
    pub const fn mode(&self) -> RoundingMode {
        self.mode
    }

    /// Single-precision addition on raw register bits.
    #[must_use]
    pub fn add(&self, a: u32, b: u32) -> u32 {
        let exact = f64::from(f32::from_bits(a)) + f64::from(f32::from_bits(b));
        self.narrow(exact)
    }

    /// Single-precision multiplication on raw register bits.
    #[must_use]
    pub fn mul(&self, a: u32, b: u32) -> u32 {
        let exact = f64::from(f32::from_bits(a)) * f64::from(f32::from_bits(b));
        self.narrow(exact)
    }

    fn narrow(&self, wide: f64) -> u32 {
        if wide.is_nan() {
            return CANONICAL_NAN;
        }
        let nearest = wide as f32;
        let adjusted = match self.mode {
            RoundingMode::NearestEven => nearest,
            RoundingMode::TowardZero => {
                if f64::from(nearest).abs() > wide.abs() {
                    toward_zero(nearest)
                } else {
                    nearest
                }
            }
            RoundingMode::TowardPositive => {
                if f64::from(nearest) < wide {
                    next_up(nearest)
                } else {
                    nearest
                }
            }
            RoundingMode::TowardNegative => {
                if f64::from(nearest) > wide {
                    next_down(nearest)
                } else {
                    nearest
                }
            }
        };
        adjusted.to_bits()
    }
}

fn next_up(value: f32) -> f32 {
    if value.is_nan() || value == f32::INFINITY {
        return value;
    }
    let bits = value.to_bits();
    let next = if value == 0.0 {
        1
    } else if bits >> 31 == 0 {
        bits + 1
    } else {
        bits - 1
    };
    f32::from_bits(next)
}

fn next_down(value: f32) -> f32 {
    -next_up(-value)
}

fn toward_zero(value: f32) -> f32 {
    if value > 0.0 {
        next_down(value)
    } else {
        next_up(value)
    }
}
