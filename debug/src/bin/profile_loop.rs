//! Headless host loop: drives ProfilerPlugin through render_api, cycles every mode and
//! exports samples (JSON) plus screenshots (PNG) for the modes that produce samples.
//! Run: cargo run -p debug --bin profile_loop -- [out_dir] [model.obj]

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use render_api::RenderBackend;
use vertex_profiler_bridge::ProfilerPlugin;
use vertex_profiler_core::{Mode, ProfilerExport};

const WIDTH: u32 = 960;
const HEIGHT: u32 = 540;
const MIN_FRAMES_PER_MODE: u32 = 3;
/// Upper bound while waiting for readback and capture to land.
const MAX_FRAMES_PER_MODE: u32 = 240;

fn write_export(dir: &Path, export: &ProfilerExport) -> Result<(), String> {
    let stem = format!("{:?}", export.mode).to_lowercase();
    let json = serde_json::to_string_pretty(&export.samples).map_err(|e| e.to_string())?;
    std::fs::write(dir.join(format!("{stem}_samples.json")), json).map_err(|e| e.to_string())?;
    export
        .screenshot
        .save(dir.join(format!("{stem}_screenshot.png")))
        .map_err(|e| e.to_string())?;
    export
        .screenshot_with_overlay
        .save(dir.join(format!("{stem}_overlay.png")))
        .map_err(|e| e.to_string())?;
    Ok(())
}

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let mut args = std::env::args().skip(1);
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| "profiler_out".to_string()));
    let extra = args.next().map(|p| debug::load_obj(Path::new(&p))).transpose()?;
    std::fs::create_dir_all(&out_dir).map_err(|e| e.to_string())?;

    let (device, queue) = pollster::block_on(debug::request_device())?;
    let mut plugin = ProfilerPlugin::new(device, queue)?;
    let (tx, rx) = mpsc::channel::<ProfilerExport>();
    plugin.set_export_sink(move |export: ProfilerExport| {
        let _ = tx.send(export);
    });

    let scene = debug::demo_scene(extra);
    let view = debug::camera_view(WIDTH, HEIGHT, 0.0);
    for mode in Mode::ALL {
        plugin.set_mode(mode);
        plugin.controls_mut().log_and_export = mode.has_samples();
        let mut frames = 0;
        while frames < MIN_FRAMES_PER_MODE
            || (frames < MAX_FRAMES_PER_MODE
                && (plugin.profiler().controls().log_and_export || plugin.profiler().readback_pending()))
        {
            plugin.prepare(&scene);
            plugin.render_frame(&view)?;
            plugin.end_of_frame()?;
            frames += 1;
        }
        log::info!("{:?}: status {:?}", mode, plugin.profiler().status());
        if let Some(latest) = plugin.profiler().latest_samples() {
            log::info!("{:?}: {} samples in the latest readback", latest.mode, latest.samples.len());
        }
        for export in rx.try_iter() {
            write_export(&out_dir, &export)?;
            println!("exported {:?}: {} samples -> {}", export.mode, export.samples.len(), out_dir.display());
        }
    }
    Ok(())
}
