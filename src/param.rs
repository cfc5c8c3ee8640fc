//! Deconvolution shape parameters.
//!
//! A [`DeconvDescriptor`] is the raw, unvalidated description handed over by
//! a model loader. [`DeconvParams::new`] checks every invariant once and
//! produces an immutable value; [`GemmDims`] is derived from it.

use gemmconv_kernel::{Activation, ActivationKind, Layout};

use crate::{DeconvError, Result};

/// Raw shape descriptor of a transposed convolution.
///
/// The default describes a valid single-channel 1x1 operator, so callers can
/// fill in only what differs with struct update syntax.
#[derive(Debug, Clone, PartialEq)]
pub struct DeconvDescriptor {
    pub batch: usize,
    pub src_channels: usize,
    pub src_height: usize,
    pub src_width: usize,
    pub dst_channels: usize,
    /// `[height, width]`.
    pub kernel: [usize; 2],
    /// `[height, width]`.
    pub stride: [usize; 2],
    /// `[height, width]`.
    pub dilation: [usize; 2],
    /// `[top, left, bottom, right]`, cropped from the full output.
    pub pad: [usize; 4],
    pub group: usize,
    pub layout: Layout,
    pub activation: ActivationKind,
    pub activation_params: Vec<f32>,
}

impl Default for DeconvDescriptor {
    fn default() -> Self {
        DeconvDescriptor {
            batch: 1,
            src_channels: 1,
            src_height: 1,
            src_width: 1,
            dst_channels: 1,
            kernel: [1, 1],
            stride: [1, 1],
            dilation: [1, 1],
            pad: [0; 4],
            group: 1,
            layout: Layout::ChannelFirst,
            activation: ActivationKind::Identity,
            activation_params: Vec::new(),
        }
    }
}

/// Validated deconvolution parameters.
///
/// Only [`DeconvParams::new`] creates values of this type, so every field
/// satisfies: all sizes, strides, dilations and the group count are at least
/// one; both channel counts are divisible by `group`; the output is non-empty.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct DeconvParams {
    pub batch: usize,
    pub src_channels: usize,
    pub src_height: usize,
    pub src_width: usize,
    pub dst_channels: usize,
    pub dst_height: usize,
    pub dst_width: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub pad_top: usize,
    pub pad_left: usize,
    pub pad_bottom: usize,
    pub pad_right: usize,
    pub group: usize,
    pub layout: Layout,
    pub activation: Activation,
}

/// Output extent of one spatial axis, or `None` if it would be empty or
/// overflow.
///
/// The full (uncropped) extent is `stride * (src - 1) + dilation * (kernel - 1) + 1`;
/// padding crops `pad_begin` and `pad_end` elements from it.
fn output_extent(
    src: usize,
    kernel: usize,
    stride: usize,
    dilation: usize,
    pad_begin: usize,
    pad_end: usize,
) -> Option<usize> {
    let full = stride
        .checked_mul(src - 1)?
        .checked_add(dilation.checked_mul(kernel - 1)?)?
        .checked_add(1)?;
    let cropped = full.checked_sub(pad_begin.checked_add(pad_end)?)?;
    (cropped > 0).then_some(cropped)
}

impl DeconvParams {
    /// Validate `desc`. On failure no parameters are produced.
    pub fn new(desc: &DeconvDescriptor) -> Result<Self> {
        let positive = [
            ("batch", desc.batch),
            ("src_channels", desc.src_channels),
            ("src_height", desc.src_height),
            ("src_width", desc.src_width),
            ("dst_channels", desc.dst_channels),
            ("kernel height", desc.kernel[0]),
            ("kernel width", desc.kernel[1]),
            ("stride height", desc.stride[0]),
            ("stride width", desc.stride[1]),
            ("dilation height", desc.dilation[0]),
            ("dilation width", desc.dilation[1]),
            ("group", desc.group),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(DeconvError::InvalidShape(format!("{name} must be at least 1")));
        }
        if desc.src_channels % desc.group != 0 {
            return Err(DeconvError::InvalidShape(format!(
                "src_channels {} is not divisible by group {}",
                desc.src_channels, desc.group
            )));
        }
        if desc.dst_channels % desc.group != 0 {
            return Err(DeconvError::InvalidShape(format!(
                "dst_channels {} is not divisible by group {}",
                desc.dst_channels, desc.group
            )));
        }

        let [pad_top, pad_left, pad_bottom, pad_right] = desc.pad;
        let dst_height = output_extent(
            desc.src_height,
            desc.kernel[0],
            desc.stride[0],
            desc.dilation[0],
            pad_top,
            pad_bottom,
        )
        .ok_or_else(|| DeconvError::InvalidShape("output height would be empty".into()))?;
        let dst_width = output_extent(
            desc.src_width,
            desc.kernel[1],
            desc.stride[1],
            desc.dilation[1],
            pad_left,
            pad_right,
        )
        .ok_or_else(|| DeconvError::InvalidShape("output width would be empty".into()))?;

        let activation =
            Activation::from_parts(desc.activation, &desc.activation_params, desc.dst_channels)?;

        let params = DeconvParams {
            batch: desc.batch,
            src_channels: desc.src_channels,
            src_height: desc.src_height,
            src_width: desc.src_width,
            dst_channels: desc.dst_channels,
            dst_height,
            dst_width,
            kernel_h: desc.kernel[0],
            kernel_w: desc.kernel[1],
            stride_h: desc.stride[0],
            stride_w: desc.stride[1],
            dilation_h: desc.dilation[0],
            dilation_w: desc.dilation[1],
            pad_top,
            pad_left,
            pad_bottom,
            pad_right,
            group: desc.group,
            layout: desc.layout,
            activation,
        };
        params.checked_volume().ok_or_else(|| {
            DeconvError::InvalidShape("tensor sizes overflow the address space".into())
        })?;
        Ok(params)
    }

    /// Largest element count any buffer derived from these parameters needs,
    /// or `None` on overflow.
    fn checked_volume(&self) -> Option<usize> {
        let src = self
            .batch
            .checked_mul(self.src_channels)?
            .checked_mul(self.src_height)?
            .checked_mul(self.src_width)?;
        let dst = self
            .batch
            .checked_mul(self.dst_channels)?
            .checked_mul(self.dst_height)?
            .checked_mul(self.dst_width)?;
        let spatial = self.dst_height.checked_mul(self.dst_width)?;
        let k = self
            .src_channels
            .checked_mul(self.kernel_h)?
            .checked_mul(self.kernel_w)?;
        let col = k.checked_mul(spatial.max(self.dst_channels))?.checked_mul(self.batch)?;
        Some(src.max(dst).max(col))
    }

    pub fn src_channels_per_group(&self) -> usize {
        self.src_channels / self.group
    }

    pub fn dst_channels_per_group(&self) -> usize {
        self.dst_channels / self.group
    }

    pub fn src_spatial(&self) -> usize {
        self.src_height * self.src_width
    }

    pub fn dst_spatial(&self) -> usize {
        self.dst_height * self.dst_width
    }

    pub fn kernel_area(&self) -> usize {
        self.kernel_h * self.kernel_w
    }

    /// Elements in one input tensor.
    pub fn src_len(&self) -> usize {
        self.batch * self.src_channels * self.src_spatial()
    }

    /// Elements in one output tensor.
    pub fn dst_len(&self) -> usize {
        self.batch * self.dst_channels * self.dst_spatial()
    }

    /// Output shape in memory order: `[N, C, H, W]` or `[N, H, W, C]`.
    pub fn dst_shape(&self) -> [usize; 4] {
        match self.layout {
            Layout::ChannelFirst => [self.batch, self.dst_channels, self.dst_height, self.dst_width],
            Layout::ChannelLast => [self.batch, self.dst_height, self.dst_width, self.dst_channels],
        }
    }

    /// Input shape in memory order.
    pub fn src_shape(&self) -> [usize; 4] {
        match self.layout {
            Layout::ChannelFirst => [self.batch, self.src_channels, self.src_height, self.src_width],
            Layout::ChannelLast => [self.batch, self.src_height, self.src_width, self.src_channels],
        }
    }

    /// 1x1 kernel, unit stride, no padding: the input already is the GEMM
    /// operand and the output has the input's spatial size.
    pub fn is_pointwise(&self) -> bool {
        self.kernel_h == 1
            && self.kernel_w == 1
            && self.stride_h == 1
            && self.stride_w == 1
            && self.pad_top == 0
            && self.pad_left == 0
            && self.pad_bottom == 0
            && self.pad_right == 0
    }
}

/// Shape of one per-(batch slice, group) matrix multiply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GemmDims {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl GemmDims {
    /// - channel-first: `C[Cout/G x HW] = A_weights[Cout/G x K] * cols[K x HW]`
    /// - channel-last: `C[HW x Cout/G] = cols[HW x K] * B_weights[K x Cout/G]`
    ///
    /// with `K = Cin/G * Kh * Kw` and `HW` the output spatial size.
    pub fn new(params: &DeconvParams) -> Self {
        let k = params.src_channels_per_group() * params.kernel_area();
        let spatial = params.dst_spatial();
        let channels = params.dst_channels_per_group();
        match params.layout {
            Layout::ChannelFirst => GemmDims {
                m: channels,
                n: spatial,
                k,
            },
            Layout::ChannelLast => GemmDims {
                m: spatial,
                n: channels,
                k,
            },
        }
    }

    /// `M*K + K*N + M*N`: elements touched by one multiply.
    pub fn min_elements(&self) -> usize {
        self.m * self.k + self.k * self.n + self.m * self.n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DeconvDescriptor {
        DeconvDescriptor {
            batch: 2,
            src_channels: 4,
            src_height: 5,
            src_width: 7,
            dst_channels: 6,
            kernel: [3, 3],
            stride: [2, 2],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_descriptor_is_valid() {
        let params = DeconvParams::new(&DeconvDescriptor::default()).unwrap();
        assert_eq!(params.dst_shape(), [1, 1, 1, 1]);
        assert!(params.is_pointwise());
    }

    #[test]
    fn test_output_size() {
        let params = DeconvParams::new(&base()).unwrap();
        // 2*(5-1) + 1*(3-1) + 1 = 11, 2*(7-1) + 2 + 1 = 15
        assert_eq!((params.dst_height, params.dst_width), (11, 15));

        let padded = DeconvParams::new(&DeconvDescriptor {
            pad: [1, 2, 0, 1],
            dilation: [2, 1],
            ..base()
        })
        .unwrap();
        // 2*4 + 2*2 + 1 - 1 = 12, 2*6 + 2 + 1 - 3 = 12
        assert_eq!((padded.dst_height, padded.dst_width), (12, 12));
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let cases = [
            DeconvDescriptor { batch: 0, ..base() },
            DeconvDescriptor { stride: [0, 1], ..base() },
            DeconvDescriptor { dilation: [1, 0], ..base() },
            DeconvDescriptor { group: 0, ..base() },
            DeconvDescriptor { group: 3, ..base() },
            DeconvDescriptor {
                group: 4,
                dst_channels: 6,
                ..base()
            },
            DeconvDescriptor { pad: [6, 0, 5, 0], ..base() },
            DeconvDescriptor {
                src_height: usize::MAX / 2,
                ..base()
            },
        ];
        for desc in cases {
            assert!(
                matches!(DeconvParams::new(&desc), Err(DeconvError::InvalidShape(_))),
                "{desc:?}"
            );
        }
    }

    #[test]
    fn test_rejects_missing_activation_params() {
        let desc = DeconvDescriptor {
            activation: ActivationKind::LeakyRelu,
            ..base()
        };
        assert!(matches!(
            DeconvParams::new(&desc),
            Err(DeconvError::Activation(_))
        ));
        let desc = DeconvDescriptor {
            activation: ActivationKind::Prelu,
            activation_params: vec![0.1; 6],
            ..base()
        };
        assert!(DeconvParams::new(&desc).is_ok());
    }

    #[test]
    fn test_gemm_dims_per_layout() {
        let desc = DeconvDescriptor {
            group: 2,
            ..base()
        };
        let first = DeconvParams::new(&desc).unwrap();
        assert_eq!(
            GemmDims::new(&first),
            GemmDims {
                m: 3,
                n: 11 * 15,
                k: 2 * 9
            }
        );
        let last = DeconvParams::new(&DeconvDescriptor {
            layout: Layout::ChannelLast,
            ..desc
        })
        .unwrap();
        assert_eq!(
            GemmDims::new(&last),
            GemmDims {
                m: 11 * 15,
                n: 3,
                k: 2 * 9
            }
        );
        assert_eq!(last.dst_shape(), [2, 11, 15, 6]);
        assert_eq!(last.src_shape(), [2, 5, 7, 4]);
    }
}
