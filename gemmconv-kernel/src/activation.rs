//! Activation functions applied by the convolution epilogue.
//!
//! Loaders hand over an [`ActivationKind`] tag plus a flat parameter list;
//! [`Activation::from_parts`] validates the pair once, so the epilogue never
//! has to re-check parameter counts on the hot path.

use crate::simd::clamp;

/// Activation tag as it appears in a raw operator descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActivationKind {
    #[default]
    Identity,
    Relu,
    LeakyRelu,
    RestrictRange,
    Prelu,
    Elu,
    Hswish,
}

impl ActivationKind {
    pub fn name(self) -> &'static str {
        match self {
            ActivationKind::Identity => "identity",
            ActivationKind::Relu => "relu",
            ActivationKind::LeakyRelu => "leaky-relu",
            ActivationKind::RestrictRange => "restrict-range",
            ActivationKind::Prelu => "prelu",
            ActivationKind::Elu => "elu",
            ActivationKind::Hswish => "hswish",
        }
    }
}

/// Errors raised while validating activation parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivationError {
    #[error("{kind} expects {expected} parameter(s), got {got}")]
    ParamCount {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("restrict-range bounds are inverted or NaN: lower={lower}, upper={upper}")]
    InvertedRange { lower: f32, upper: f32 },
}

/// Validated activation with its parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    LeakyRelu { slope: f32 },
    RestrictRange { lower: f32, upper: f32 },
    /// One slope per output channel.
    Prelu { slopes: Vec<f32> },
    Elu { alpha: f32 },
    Hswish { shift: f32, scale: f32 },
}

impl Activation {
    /// Build an activation from a descriptor tag and its raw parameters.
    ///
    /// `channels` is the number of output channels; PReLU needs exactly that
    /// many slopes.
    pub fn from_parts(
        kind: ActivationKind,
        params: &[f32],
        channels: usize,
    ) -> Result<Self, ActivationError> {
        let expect = |expected: usize| {
            if params.len() == expected {
                Ok(())
            } else {
                Err(ActivationError::ParamCount {
                    kind: kind.name(),
                    expected,
                    got: params.len(),
                })
            }
        };

        match kind {
            ActivationKind::Identity => expect(0).map(|_| Activation::Identity),
            ActivationKind::Relu => expect(0).map(|_| Activation::Relu),
            ActivationKind::LeakyRelu => {
                expect(1).map(|_| Activation::LeakyRelu { slope: params[0] })
            }
            ActivationKind::RestrictRange => {
                expect(2)?;
                let (lower, upper) = (params[0], params[1]);
                // `!(a <= b)` also rejects NaN bounds.
                if !(lower <= upper) {
                    return Err(ActivationError::InvertedRange { lower, upper });
                }
                Ok(Activation::RestrictRange { lower, upper })
            }
            ActivationKind::Prelu => expect(channels).map(|_| Activation::Prelu {
                slopes: params.to_vec(),
            }),
            ActivationKind::Elu => expect(1).map(|_| Activation::Elu { alpha: params[0] }),
            ActivationKind::Hswish => expect(2).map(|_| Activation::Hswish {
                shift: params[0],
                scale: params[1],
            }),
        }
    }

    pub fn kind(&self) -> ActivationKind {
        match self {
            Activation::Identity => ActivationKind::Identity,
            Activation::Relu => ActivationKind::Relu,
            Activation::LeakyRelu { .. } => ActivationKind::LeakyRelu,
            Activation::RestrictRange { .. } => ActivationKind::RestrictRange,
            Activation::Prelu { .. } => ActivationKind::Prelu,
            Activation::Elu { .. } => ActivationKind::Elu,
            Activation::Hswish { .. } => ActivationKind::Hswish,
        }
    }

    /// Apply the activation to one value `y` (bias already added) of output
    /// channel `channel`.
    #[inline]
    pub fn apply_scalar(&self, y: f32, channel: usize) -> f32 {
        match self {
            Activation::Identity => y,
            Activation::Relu => clamp(y, 0.0, f32::INFINITY),
            Activation::LeakyRelu { slope } => {
                if y >= 0.0 {
                    y
                } else {
                    slope * y
                }
            }
            Activation::RestrictRange { lower, upper } => clamp(y, *lower, *upper),
            Activation::Prelu { slopes } => {
                if y >= 0.0 {
                    y
                } else {
                    slopes[channel] * y
                }
            }
            Activation::Elu { alpha } => {
                if y >= 0.0 {
                    y
                } else {
                    alpha * (y.exp() - 1.0)
                }
            }
            Activation::Hswish { shift, scale } => (y.min(*shift) + shift).max(0.0) * scale * y,
        }
    }
}
