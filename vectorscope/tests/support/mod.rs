use std::env;

use vectorscope::render::context::GpuContext;

pub fn gpu_tests_enabled() -> bool {
    matches!(
        env::var("VECTORSCOPE_RUN_GPU_TESTS")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Headless device, or `None` (with a note on stderr) when GPU tests are
/// not enabled.
#[allow(dead_code)]
pub fn gpu(test: &str) -> Option<GpuContext> {
    if !gpu_tests_enabled() {
        eprintln!(
            "Skipping {}. Set VECTORSCOPE_RUN_GPU_TESTS=1 to run.",
            test
        );
        return None;
    }

    Some(GpuContext::headless().expect("expected a headless GPU device"))
}
