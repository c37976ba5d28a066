//! Window-capable backend: created from a window, implements RenderBackendWindow.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use render_api::{ExtractedMeshes, ExtractedView, RenderBackend, RenderBackendWindow};
use vertex_profiler_core::ProfilerConfig;
use wgpu::SurfaceTargetUnsafe;

use crate::plugin::ProfilerPlugin;
use crate::present::PresentPass;

/// Backend that owns the wgpu Instance and a ProfilerPlugin; presents the profiler
/// composite to a window. The surface is recreated each frame from the raw handles
/// the host passes to `render_frame_to_window`.
pub struct ProfilerWindowBackend {
    instance: wgpu::Instance,
    plugin: ProfilerPlugin,
    present: PresentPass,
    swapchain_format: wgpu::TextureFormat,
}

impl ProfilerWindowBackend {
    /// The host must keep the window alive and pass its raw handles every frame.
    pub fn from_window(
        window: &(impl HasWindowHandle + HasDisplayHandle),
        config: ProfilerConfig,
    ) -> Result<Self, String> {
        let (raw_window, raw_display) = {
            let wh = window.window_handle().map_err(|e| e.to_string())?;
            let dh = window.display_handle().map_err(|e| e.to_string())?;
            (wh.as_raw(), dh.as_raw())
        };
        pollster::block_on(Self::from_raw_handles_async(raw_window, raw_display, config))
    }

    async fn from_raw_handles_async(
        raw_window_handle: raw_window_handle::RawWindowHandle,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        config: ProfilerConfig,
    ) -> Result<Self, String> {
        let instance = wgpu::Instance::default();
        let target = SurfaceTargetUnsafe::RawHandle {
            raw_window_handle,
            raw_display_handle,
        };
        let surface = unsafe { instance.create_surface_unsafe(target).map_err(|e| e.to_string())? };
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or("No adapter")?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .map_err(|e| e.to_string())?;
        let caps = surface.get_capabilities(&adapter);
        let swapchain_format = caps
            .formats
            .first()
            .copied()
            .unwrap_or(wgpu::TextureFormat::Rgba8Unorm);
        let present = PresentPass::new(&device, swapchain_format.add_srgb_suffix());
        let plugin = ProfilerPlugin::new_with_config(device, queue, config)?;
        drop(surface);
        Ok(Self { instance, plugin, present, swapchain_format })
    }

    pub fn plugin(&self) -> &ProfilerPlugin {
        &self.plugin
    }

    pub fn plugin_mut(&mut self) -> &mut ProfilerPlugin {
        &mut self.plugin
    }

    fn surface_config(format: wgpu::TextureFormat, width: u32, height: u32) -> wgpu::SurfaceConfiguration {
        wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: vec![format.add_srgb_suffix()],
            desired_maximum_frame_latency: 2,
        }
    }
}

impl RenderBackend for ProfilerWindowBackend {
    fn prepare(&mut self, extracted: &ExtractedMeshes) {
        self.plugin.prepare(extracted);
    }

    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String> {
        self.plugin.render_frame(view)
    }

    fn end_of_frame(&mut self) -> Result<(), String> {
        self.plugin.end_of_frame()
    }
}

impl RenderBackendWindow for ProfilerWindowBackend {
    fn render_frame_to_window(
        &mut self,
        view: &ExtractedView,
        raw_window_handle: raw_window_handle::RawWindowHandle,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
    ) -> Result<(), String> {
        let target = SurfaceTargetUnsafe::RawHandle {
            raw_window_handle,
            raw_display_handle,
        };
        let surface = unsafe {
            self.instance
                .create_surface_unsafe(target)
                .map_err(|e| e.to_string())?
        };
        let (width, height) = view.viewport_size;
        let config = Self::surface_config(self.swapchain_format, width.max(1), height.max(1));
        surface.configure(self.plugin.device(), &config);

        let frame = match surface.get_current_texture() {
            Ok(f) => f,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                surface.configure(self.plugin.device(), &config);
                surface.get_current_texture().map_err(|e| e.to_string())?
            }
            Err(wgpu::SurfaceError::Timeout) => return Err("Surface get_current_texture timeout".to_string()),
            Err(e) => return Err(e.to_string()),
        };
        let output = frame.texture.create_view(&wgpu::TextureViewDescriptor {
            format: Some(self.swapchain_format.add_srgb_suffix()),
            ..Default::default()
        });
        self.plugin.render_frame_to_swapchain(view, &self.present, &output)?;
        frame.present();
        Ok(())
    }
}
