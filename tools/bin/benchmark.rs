/// Benchmark comparing the single-pass and tiled CPU fallbacks
///
/// Both paths upscale the same synthetic 1024x768 image by 4x. The tiled path
/// trades some throughput for a bounded per-tile working set, which is what
/// lets it handle targets above the tiling threshold.
use std::time::{Duration, Instant};

use crop_scale::presets::Size;
use image::{Rgba, RgbaImage};
use smart_crop::config::CascadeConfig;
use smart_crop::processing::resample;

fn main() {
    println!("CPU Fallback Benchmark");
    println!("═══════════════════════════════════");

    let (width, height, scale) = (1024u32, 768u32, 4u32);
    let runs = 5;
    let target = Size::new(width * scale, height * scale);
    let source = synthetic(width, height);
    let config = CascadeConfig::default();

    println!(
        "Benchmarking: {}x{} → {}x{}, {} runs",
        width, height, target.w, target.h, runs
    );
    println!();

    println!("Running enhanced single-pass fallback...");
    let enhanced = time_runs(runs, || resample::enhanced(&source, target, &config));

    println!("Running tiled fallback ({}px tiles)...", config.tile_size);
    let tiled = time_runs(runs, || resample::tiled(&source, target, &config));

    let (Some(enhanced), Some(tiled)) = (enhanced, tiled) else {
        eprintln!("A fallback failed; no results to compare.");
        std::process::exit(1);
    };

    println!();
    println!("Results:");
    println!("───────────");
    report("Enhanced", enhanced, runs, target);
    report("Tiled", tiled, runs, target);
    println!(
        "Tiled / enhanced time: {:.2}x",
        tiled.as_secs_f64() / enhanced.as_secs_f64()
    );

    let full_frame = target.pixels() * 4;
    let tile_side = u64::from(config.tile_size);
    let per_tile = tile_side * tile_side * 4;
    println!();
    println!("Working Set:");
    println!("─────────────────────");
    println!(
        "Single pass: {:.1} MB intermediate",
        full_frame as f64 / 1_000_000.0
    );
    println!("Per tile: {:.1} MB intermediate", per_tile as f64 / 1_000_000.0);
}

fn synthetic(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let checker = if (x / 16 + y / 16) % 2 == 0 { 40 } else { 0 };
        Rgba([
            ((x * 255 / width) as u8).saturating_add(checker),
            ((y * 255 / height) as u8).saturating_add(checker),
            128,
            255,
        ])
    })
}

/// Total wall time for `runs` calls, or `None` if any call failed.
fn time_runs<T, E: std::fmt::Display>(
    runs: u32,
    mut f: impl FnMut() -> Result<T, E>,
) -> Option<Duration> {
    let start = Instant::now();
    for _ in 0..runs {
        if let Err(e) = f() {
            eprintln!("  failed: {}", e);
            return None;
        }
    }
    Some(start.elapsed())
}

fn report(name: &str, total: Duration, runs: u32, target: Size) {
    let per_run = total.as_secs_f64() / f64::from(runs);
    let megapixels = target.pixels() as f64 / 1_000_000.0;
    println!(
        "{}: {:.1} ms per run ({:.1} MP/s)",
        name,
        per_run * 1000.0,
        megapixels / per_run
    );
}
