//! Fused per-channel bias + activation pass over a GEMM result.

use crate::activation::Activation;
use crate::simd::{apply_row, dispatch_if_large, RowBias, RowOp, RowSlope};

/// Memory order of an activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    /// `[N, C, H, W]`: the spatial index varies fastest.
    #[default]
    ChannelFirst,
    /// `[N, H, W, C]`: the channel index varies fastest.
    ChannelLast,
}

impl Layout {
    pub fn name(self) -> &'static str {
        match self {
            Layout::ChannelFirst => "nchw",
            Layout::ChannelLast => "nhwc",
        }
    }
}

/// Add per-channel bias and apply `activation`, in place.
///
/// `data` holds `channels * spatial` values in `layout` order: for
/// [`Layout::ChannelFirst`] there are `channels` rows of `spatial` values,
/// for [`Layout::ChannelLast`] there are `spatial` rows of `channels` values.
/// The block covers output channels `first_channel..first_channel + channels`;
/// `bias` and PReLU slopes are indexed by absolute channel number so one
/// group's slice can be finalized on its own.
///
/// All arithmetic is single precision; NaN and infinities pass through.
pub fn bias_and_activation(
    data: &mut [f32],
    layout: Layout,
    channels: usize,
    spatial: usize,
    first_channel: usize,
    bias: Option<&[f32]>,
    activation: &Activation,
) {
    debug_assert_eq!(data.len(), channels * spatial);
    if let Some(b) = bias {
        debug_assert!(b.len() >= first_channel + channels);
    }
    if channels == 0 || spatial == 0 {
        return;
    }
    let bias = bias.map(|b| &b[first_channel..first_channel + channels]);

    match layout {
        Layout::ChannelFirst => {
            for (c, row) in data.chunks_exact_mut(spatial).enumerate() {
                let row_bias = bias.map_or(RowBias::None, |b| RowBias::Uniform(b[c]));
                finish_row(row, row_bias, activation, first_channel, Some(first_channel + c));
            }
        }
        Layout::ChannelLast => {
            let row_bias = bias.map_or(RowBias::None, RowBias::PerLane);
            for row in data.chunks_exact_mut(channels) {
                finish_row(row, row_bias, activation, first_channel, None);
            }
        }
    }
}

/// Finish one row. `channel` is set when every element of the row belongs
/// to the same channel; otherwise element `i` belongs to `first_channel + i`.
fn finish_row(
    row: &mut [f32],
    bias: RowBias<'_>,
    activation: &Activation,
    first_channel: usize,
    channel: Option<usize>,
) {
    let op = match activation {
        Activation::Identity => RowOp::Identity,
        Activation::Relu => RowOp::Clamp {
            lower: 0.0,
            upper: f32::INFINITY,
        },
        Activation::RestrictRange { lower, upper } => RowOp::Clamp {
            lower: *lower,
            upper: *upper,
        },
        Activation::LeakyRelu { slope } => RowOp::Leaky(RowSlope::Uniform(*slope)),
        Activation::Prelu { slopes } => match channel {
            Some(c) => RowOp::Leaky(RowSlope::Uniform(slopes[c])),
            None => RowOp::Leaky(RowSlope::PerLane(
                &slopes[first_channel..first_channel + row.len()],
            )),
        },
        Activation::Elu { .. } | Activation::Hswish { .. } => {
            apply_row(row, bias, RowOp::Identity);
            dispatch_if_large(row.len(), || match channel {
                Some(c) => row.iter_mut().for_each(|x| *x = activation.apply_scalar(*x, c)),
                None => row
                    .iter_mut()
                    .enumerate()
                    .for_each(|(i, x)| *x = activation.apply_scalar(*x, first_channel + i)),
            });
            return;
        }
    };
    apply_row(row, bias, op);
}
