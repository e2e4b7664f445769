//! Shared helpers for the readback integration tests.

use pixeltap::SoftSurface;

#[allow(dead_code)]
pub fn require_gpu() -> bool {
    let Ok(raw) = std::env::var("PIXELTAP_REQUIRE_GPU") else {
        return false;
    };

    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

#[allow(dead_code)]
pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_gpu() {
        panic!("PIXELTAP_REQUIRE_GPU is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}

/// Fill a surface so every byte of frame `sequence` equals `sequence as u8`.
#[allow(dead_code)]
pub fn paint_sequence(surface: &mut SoftSurface, sequence: u64) {
    let bpp = surface.descriptor().format.bytes_per_pixel() as usize;
    surface.fill(&vec![sequence as u8; bpp]);
}
