//! Loop-based transposed convolution used as ground truth.
//!
//! Scatters every input pixel through every kernel tap into an `f64`
//! accumulator, which is the textbook definition and shares no code with
//! the GEMM lowering under test.

use gemmconv::{Activation, DeconvDescriptor, Layout};

pub struct RefShape {
    pub dst_height: usize,
    pub dst_width: usize,
}

pub fn ref_shape(desc: &DeconvDescriptor) -> RefShape {
    let full_h = desc.stride[0] * (desc.src_height - 1) + desc.dilation[0] * (desc.kernel[0] - 1) + 1;
    let full_w = desc.stride[1] * (desc.src_width - 1) + desc.dilation[1] * (desc.kernel[1] - 1) + 1;
    RefShape {
        dst_height: full_h - desc.pad[0] - desc.pad[2],
        dst_width: full_w - desc.pad[1] - desc.pad[3],
    }
}

/// Index of `(b, c, y, x)` in a tensor of `channels x height x width` images.
pub fn tensor_index(
    layout: Layout,
    channels: usize,
    height: usize,
    width: usize,
    b: usize,
    c: usize,
    y: usize,
    x: usize,
) -> usize {
    match layout {
        Layout::ChannelFirst => ((b * channels + c) * height + y) * width + x,
        Layout::ChannelLast => ((b * height + y) * width + x) * channels + c,
    }
}

/// Index of canonical weight `(ci, co_in_group, ky, kx)`.
pub fn weight_index(desc: &DeconvDescriptor, ci: usize, co: usize, ky: usize, kx: usize) -> usize {
    let cout_g = desc.dst_channels / desc.group;
    let [kh, kw] = desc.kernel;
    match desc.layout {
        Layout::ChannelFirst => ((ci * cout_g + co) * kh + ky) * kw + kx,
        Layout::ChannelLast => ((ky * kw + kx) * desc.src_channels + ci) * cout_g + co,
    }
}

pub fn deconv_reference(
    desc: &DeconvDescriptor,
    src: &[f32],
    weights: &[f32],
    bias: Option<&[f32]>,
) -> Vec<f32> {
    let RefShape {
        dst_height,
        dst_width,
    } = ref_shape(desc);
    let (cin, cout) = (desc.src_channels, desc.dst_channels);
    let cin_g = cin / desc.group;
    let cout_g = cout / desc.group;
    let [kh, kw] = desc.kernel;
    let activation =
        Activation::from_parts(desc.activation, &desc.activation_params, cout).unwrap();

    let mut acc = vec![0.0f64; desc.batch * cout * dst_height * dst_width];
    for b in 0..desc.batch {
        for ci in 0..cin {
            let g = ci / cin_g;
            for iy in 0..desc.src_height {
                for ix in 0..desc.src_width {
                    let x = src[tensor_index(
                        desc.layout,
                        cin,
                        desc.src_height,
                        desc.src_width,
                        b,
                        ci,
                        iy,
                        ix,
                    )] as f64;
                    for ky in 0..kh {
                        let oy = (iy * desc.stride[0] + ky * desc.dilation[0]) as isize
                            - desc.pad[0] as isize;
                        if oy < 0 || oy as usize >= dst_height {
                            continue;
                        }
                        for kx in 0..kw {
                            let ox = (ix * desc.stride[1] + kx * desc.dilation[1]) as isize
                                - desc.pad[1] as isize;
                            if ox < 0 || ox as usize >= dst_width {
                                continue;
                            }
                            for col in 0..cout_g {
                                let co = g * cout_g + col;
                                let w = weights[weight_index(desc, ci, col, ky, kx)] as f64;
                                acc[tensor_index(
                                    desc.layout,
                                    cout,
                                    dst_height,
                                    dst_width,
                                    b,
                                    co,
                                    oy as usize,
                                    ox as usize,
                                )] += x * w;
                            }
                        }
                    }
                }
            }
        }
    }

    let mut out = vec![0.0f32; acc.len()];
    for b in 0..desc.batch {
        for co in 0..cout {
            for y in 0..dst_height {
                for x in 0..dst_width {
                    let i = tensor_index(desc.layout, cout, dst_height, dst_width, b, co, y, x);
                    let v = acc[i] as f32 + bias.map_or(0.0, |bias| bias[co]);
                    out[i] = activation.apply_scalar(v, co);
                }
            }
        }
    }
    out
}
