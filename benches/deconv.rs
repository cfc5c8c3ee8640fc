//! Deconvolution benchmark: plain vs packed backend.
//!
//! Typical decoder/upsampling shapes (4x4 kernel, stride 2, pad 1), run in
//! both layouts. The packed backend only applies to channel-last, ungrouped
//! operators; elsewhere both rows measure the plain path.

use gemmconv::{BackendPreference, DeconvDescriptor, DeconvOptions, Deconvolution, Layout};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::hint::black_box;
use std::time::{Duration, Instant};

fn mean(durations: &[Duration]) -> Duration {
    let total_nanos: u128 = durations.iter().map(|d| d.as_nanos()).sum();
    Duration::from_nanos((total_nanos / durations.len() as u128) as u64)
}

fn bench_n(label: &str, warmup_iters: usize, iters: usize, mut f: impl FnMut()) -> Duration {
    for _ in 0..warmup_iters {
        f();
    }

    let mut samples = Vec::with_capacity(iters);
    for _ in 0..iters {
        let t0 = Instant::now();
        f();
        samples.push(t0.elapsed());
    }

    let avg = mean(&samples);
    println!("  {label}: {:.3} ms", avg.as_secs_f64() * 1e3);
    avg
}

fn run_case(batch: usize, cin: usize, cout: usize, size: usize, group: usize, layout: Layout) {
    let desc = DeconvDescriptor {
        batch,
        src_channels: cin,
        src_height: size,
        src_width: size,
        dst_channels: cout,
        kernel: [4, 4],
        stride: [2, 2],
        pad: [1, 1, 1, 1],
        group,
        layout,
        ..Default::default()
    };
    let mut rng = StdRng::seed_from_u64(42);
    let weight_len = cin * (cout / group) * 16;
    let weights: Vec<f32> = (0..weight_len).map(|_| rng.gen::<f32>() - 0.5).collect();
    let bias: Vec<f32> = (0..cout).map(|_| rng.gen::<f32>()).collect();

    println!(
        "{} n={batch} {cin}->{cout} {size}x{size} g={group}:",
        layout.name()
    );
    for backend in [BackendPreference::Plain, BackendPreference::Packed] {
        let opts = DeconvOptions {
            backend,
            ..Default::default()
        };
        let mut op = Deconvolution::with_options(&desc, &weights, Some(&bias[..]), &opts).unwrap();
        let src: Vec<f32> = (0..op.src_len()).map(|_| rng.gen::<f32>()).collect();
        let mut dst = vec![0.0f32; op.dst_len()];
        bench_n(op.backend_name(), 2, 10, || {
            op.forward(&src, &mut dst).unwrap();
            black_box(dst.as_ptr());
        });
    }
}

fn main() {
    for layout in [Layout::ChannelFirst, Layout::ChannelLast] {
        run_case(1, 64, 32, 16, 1, layout);
        run_case(4, 32, 16, 32, 1, layout);
        run_case(2, 32, 32, 32, 4, layout);
    }
}
