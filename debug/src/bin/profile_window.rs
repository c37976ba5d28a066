//! Windowed host: renders the demo scene through ProfilerWindowBackend.
//! Keys: 0-5 select the mode, D logs samples for display, E exports, R recollects renderers.
//! Run: cargo run -p debug --bin profile_window

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use render_api::{ExtractedMeshes, RenderBackend, RenderBackendWindow};
use vertex_profiler_bridge::ProfilerWindowBackend;
use vertex_profiler_core::{Mode, ProfilerConfig, ProfilerExport};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowId;

struct App {
    window: Option<winit::window::Window>,
    backend: Option<ProfilerWindowBackend>,
    size: (u32, u32),
    scene: ExtractedMeshes,
    orbit: f32,
}

impl App {
    fn new() -> Self {
        Self {
            window: None,
            backend: None,
            size: (1280, 720),
            scene: debug::demo_scene(None),
            orbit: 0.0,
        }
    }

    fn handle_key(&mut self, key: &Key) {
        let Some(backend) = self.backend.as_mut() else { return };
        let plugin = backend.plugin_mut();
        match key {
            Key::Character(c) => match c.as_str() {
                digit @ ("0" | "1" | "2" | "3" | "4" | "5") => {
                    let index = digit.parse::<usize>().unwrap_or(0);
                    plugin.set_mode(Mode::ALL[index]);
                }
                "d" => plugin.controls_mut().log_for_display = true,
                "e" => plugin.controls_mut().log_and_export = true,
                "r" => plugin.controls_mut().recollect_renderers = true,
                _ => {}
            },
            Key::Named(NamedKey::ArrowLeft) => self.orbit -= 0.1,
            Key::Named(NamedKey::ArrowRight) => self.orbit += 0.1,
            _ => {}
        }
    }
}

fn print_export(export: ProfilerExport) {
    println!(
        "export {:?}: {} samples, screenshot {}x{}",
        export.mode,
        export.samples.len(),
        export.screenshot.width(),
        export.screenshot.height()
    );
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = winit::window::WindowAttributes::default()
            .with_title("Vertex profiler")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let window = match event_loop.create_window(attrs) {
            Ok(w) => w,
            Err(e) => {
                eprintln!("create window failed: {}", e);
                event_loop.exit();
                return;
            }
        };
        let phys = window.inner_size();
        self.size = (phys.width.max(1), phys.height.max(1));
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(physical) => {
                self.size = (physical.width.max(1), physical.height.max(1));
                if let Some(ref w) = self.window {
                    w.request_redraw();
                }
            }
            WindowEvent::KeyboardInput {
                event: KeyEvent { logical_key, state: ElementState::Pressed, .. },
                ..
            } => self.handle_key(&logical_key),
            WindowEvent::RedrawRequested => {
                let Some(window) = &self.window else { return };
                if self.backend.is_none() {
                    match ProfilerWindowBackend::from_window(window, ProfilerConfig::default()) {
                        Ok(mut backend) => {
                            backend.plugin_mut().set_export_sink(print_export);
                            self.backend = Some(backend);
                        }
                        Err(e) => {
                            eprintln!("ProfilerWindowBackend::from_window failed: {}", e);
                            return;
                        }
                    }
                }
                let (raw_window, raw_display) = match (window.window_handle(), window.display_handle()) {
                    (Ok(wh), Ok(dh)) => (wh.as_raw(), dh.as_raw()),
                    _ => return,
                };
                let view = debug::camera_view(self.size.0, self.size.1, self.orbit);
                let Some(backend) = self.backend.as_mut() else { return };
                backend.prepare(&self.scene);
                if let Err(e) = backend.render_frame_to_window(&view, raw_window, raw_display) {
                    log::warn!("frame failed: {}", e);
                }
                if let Err(e) = backend.end_of_frame() {
                    log::warn!("end of frame failed: {}", e);
                }
                window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), String> {
    env_logger::init();
    let event_loop = winit::event_loop::EventLoop::new().map_err(|e| e.to_string())?;
    let mut app = App::new();
    event_loop.run_app(&mut app).map_err(|e| e.to_string())?;
    Ok(())
}
