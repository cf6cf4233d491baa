// src/browser/init_script.rs
//
// Assembles the per-persona set of antidetect patches (spec.md §4.6's
// fourteen-vector table) into the `ContextOptions::init_scripts` list
// `factory::build_context_options` hands to the driver, parameterized by
// the session's derived `Fingerprint` so the timezone/locale/hardware
// values the script enforces always match what the rest of the context
// (user agent, viewport) already presents.

use super::antidetect;
use super::fingerprint::Fingerprint;
use crate::rng::SecureRng;

const GPU_VENDORS: &[(&str, &str)] = &[
    ("Intel Inc.", "Intel Iris OpenGL Engine"),
    ("NVIDIA Corporation", "NVIDIA GeForce GTX 1660/PCIe/SSE2"),
    ("Google Inc. (AMD)", "ANGLE (AMD, AMD Radeon RX 580 Direct3D11)"),
];

/// Base set applied to every context regardless of persona or page, plus a
/// per-session noise seed drawn once so canvas/audio/timing noise stays
/// stable for the lifetime of the context instead of re-randomizing on
/// every read (which would itself be a detectable tell).
pub fn build(fp: &Fingerprint, rng: &mut SecureRng) -> Vec<String> {
    let (vendor, renderer) = *rng.pick(GPU_VENDORS).unwrap_or(&GPU_VENDORS[0]);
    let noise_seed: u32 = rng.int_in(0, i64::from(u32::MAX)) as u32;
    vec![
        antidetect::patch_webdriver_flag(),
        antidetect::patch_plugins_and_languages(&fp.locale),
        antidetect::patch_chrome_runtime(),
        antidetect::patch_permissions_query(),
        antidetect::patch_webgl_vendor(vendor, renderer, noise_seed),
        antidetect::patch_cdc_properties(),
        antidetect::patch_canvas_noise(noise_seed),
        antidetect::patch_audio_noise(noise_seed),
        antidetect::patch_hardware_profile(fp.hardware_concurrency, fp.device_memory_gb),
        antidetect::patch_rtc_ice_filtering(),
        antidetect::patch_get_battery(),
        antidetect::patch_timezone(&fp.timezone),
        antidetect::patch_timing_jitter(noise_seed),
        antidetect::patch_error_stack_scrub(),
        antidetect::patch_screen_consistency(fp.viewport_width, fp.viewport_height, fp.device_pixel_ratio),
    ]
}

/// Lighter "medium" variant (spec.md §4.6) layered on top of `build`'s base
/// set for pages known to host anti-debugger scripts, rather than shipped
/// on every page by default.
pub fn build_medium(fp: &Fingerprint, rng: &mut SecureRng) -> Vec<String> {
    let mut scripts = build(fp, rng);
    scripts.push(antidetect::patch_medium_variant());
    scripts
}
