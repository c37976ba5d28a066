//! Minimal wgpu init (no window). Verifies wgpu and the profiler pipelines build on this adapter.

use vertex_profiler_core::{build_accumulator, Mode, ProfilerConfig, VertexProfiler};

fn main() -> Result<(), String> {
    env_logger::init();
    let (device, _queue) = pollster::block_on(debug::request_device())?;
    let config = ProfilerConfig::default();
    let _profiler = VertexProfiler::new(&device, config.clone()).map_err(|e| e.to_string())?;
    for mode in Mode::ALL {
        let enabled = build_accumulator(&device, mode, &config).map(|acc| acc.enabled());
        println!("{:?}: {}", mode, match enabled {
            None => "no pipelines",
            Some(true) => "ok",
            Some(false) => "shaders unavailable",
        });
    }
    println!("vertex profiler minimal_wgpu: OK");
    Ok(())
}
