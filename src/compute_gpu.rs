use std::{
    cell::RefCell,
    sync::mpsc::{self, Receiver, TryRecvError},
};

use tracing::{debug, info};
use wgpu::util::DeviceExt as _;

use crate::{
    compute::{ComputeDevice, DeviceInfo, DeviceSelector, select_device, select_platform},
    coords::FieldSpec,
    foundation::{
        core::{JuliaParam, Rgba8, rgba_len},
        error::{FractalError, FractalResult},
    },
    kernel::{
        ENTRY_EVEN_IM, ENTRY_EVEN_RE, ENTRY_RENDER, FIELD_WORKGROUP, FrameUniform,
        RENDER_WORKGROUP,
    },
    palette::ColorPalette,
};

const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Adapter, device and queue of one run. Dropping the session releases the device.
pub struct ComputeSession {
    info: DeviceInfo,
    limits: wgpu::Limits,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

pub struct GpuProgram {
    even_re: wgpu::ComputePipeline,
    even_im: wgpu::ComputePipeline,
    render: wgpu::ComputePipeline,
    field_layout: wgpu::BindGroupLayout,
    frame_layout: wgpu::BindGroupLayout,
}

type MapResult = Result<(), wgpu::BufferAsyncError>;

pub struct GpuSurface {
    size: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    staging: wgpu::Buffer,
    padded_bytes_per_row: u32,
    pending_map: RefCell<Option<Receiver<MapResult>>>,
}

pub struct GpuShared {
    samples: u32,
    cmap_len: u32,
    domain: (f32, f32),
    re: wgpu::Buffer,
    im: wgpu::Buffer,
    cmap: wgpu::Buffer,
    field_group: wgpu::BindGroup,
}

#[derive(Debug)]
pub struct GpuBinding {
    size: u32,
    pipeline: wgpu::ComputePipeline,
    group: wgpu::BindGroup,
    _uniform: wgpu::Buffer,
}

impl ComputeSession {
    /// Picks a platform (wgpu backend) and a device on it, then opens the device.
    pub fn acquire(selector: &DeviceSelector) -> FractalResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let mut platforms: Vec<(wgpu::Backend, Vec<wgpu::Adapter>)> = Vec::new();
        for adapter in instance.enumerate_adapters(wgpu::Backends::all()) {
            let backend = adapter.get_info().backend;
            match platforms.iter_mut().find(|(b, _)| *b == backend) {
                Some((_, list)) => list.push(adapter),
                None => platforms.push((backend, vec![adapter])),
            }
        }
        if platforms.is_empty() {
            return Err(FractalError::platform_unavailable(
                "no wgpu backend exposes an adapter",
            ));
        }
        info!(count = platforms.len(), "found compute platforms");

        let platform_idx = select_platform(platforms.len(), selector.platform)?;
        let (backend, mut adapters) = platforms.swap_remove(platform_idx);
        for (i, a) in adapters.iter().enumerate() {
            debug!(index = i, name = %a.get_info().name, "available device");
        }
        let device_idx = select_device(adapters.len(), selector.device)?;
        let adapter = adapters.swap_remove(device_idx);
        let adapter_info = adapter.get_info();

        check_surface_support(&adapter)?;

        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("julia_device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| FractalError::device_unavailable(format!("request_device failed: {e}")))?;

        let info = DeviceInfo {
            platform: format!("{backend:?}"),
            name: adapter_info.name.clone(),
            device_type: format!("{:?}", adapter_info.device_type),
        };
        info!(platform = %info.platform, device = %info.name, "using compute device");
        debug!(
            max_workgroup_size_x = limits.max_compute_workgroup_size_x,
            max_workgroup_size_y = limits.max_compute_workgroup_size_y,
            max_invocations = limits.max_compute_invocations_per_workgroup,
            max_texture_2d = limits.max_texture_dimension_2d,
            "device limits"
        );

        Ok(Self {
            info,
            limits,
            device,
            queue,
        })
    }

    fn scoped<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        (out, validation.or(oom))
    }
}

fn check_surface_support(adapter: &wgpu::Adapter) -> FractalResult<()> {
    let downlevel = adapter.get_downlevel_capabilities();
    if !downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
        return Err(FractalError::unsupported_device(
            "device does not support compute shaders",
        ));
    }
    let features = adapter.get_texture_format_features(SURFACE_FORMAT);
    if !features
        .allowed_usages
        .contains(wgpu::TextureUsages::STORAGE_BINDING)
    {
        return Err(FractalError::unsupported_device(
            "device has no 2-D storage image support for rgba8unorm",
        ));
    }
    Ok(())
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl ComputeDevice for ComputeSession {
    type Program = GpuProgram;
    type Surface = GpuSurface;
    type Shared = GpuShared;
    type Binding = GpuBinding;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn compile(&self, source: &str) -> FractalResult<GpuProgram> {
        let (program, err) = self.scoped(|| {
            let module = self
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("julia_program"),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                });

            let frame_layout =
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("julia_frame_bgl"),
                        entries: &[
                            wgpu::BindGroupLayoutEntry {
                                binding: 0,
                                visibility: wgpu::ShaderStages::COMPUTE,
                                ty: wgpu::BindingType::StorageTexture {
                                    access: wgpu::StorageTextureAccess::WriteOnly,
                                    format: SURFACE_FORMAT,
                                    view_dimension: wgpu::TextureViewDimension::D2,
                                },
                                count: None,
                            },
                            storage_entry(1, true),
                            storage_entry(2, true),
                            storage_entry(3, true),
                            uniform_entry(4),
                        ],
                    });
            let field_layout =
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("julia_field_bgl"),
                        entries: &[
                            storage_entry(5, false),
                            storage_entry(6, false),
                            uniform_entry(7),
                        ],
                    });

            let pipeline = |layout: &wgpu::BindGroupLayout, entry: &str| {
                let pl = self
                    .device
                    .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some(entry),
                        bind_group_layouts: &[layout],
                        push_constant_ranges: &[],
                    });
                self.device
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(entry),
                        layout: Some(&pl),
                        module: &module,
                        entry_point: Some(entry),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        cache: None,
                    })
            };

            GpuProgram {
                even_re: pipeline(&field_layout, ENTRY_EVEN_RE),
                even_im: pipeline(&field_layout, ENTRY_EVEN_IM),
                render: pipeline(&frame_layout, ENTRY_RENDER),
                field_layout,
                frame_layout,
            }
        });

        if let Some(err) = err {
            return Err(FractalError::build_failure(err.to_string()));
        }
        info!("compiled device program");
        Ok(program)
    }

    fn create_surface(&self, size: u32) -> FractalResult<GpuSurface> {
        if size == 0 || size > self.limits.max_texture_dimension_2d {
            return Err(FractalError::allocation(format!(
                "surface side {size} outside 1..={}",
                self.limits.max_texture_dimension_2d
            )));
        }
        let padded_bytes_per_row = align_to(size * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging_size = u64::from(padded_bytes_per_row) * u64::from(size);

        let (surface, err) = self.scoped(|| {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("julia_frame_surface"),
                size: wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: SURFACE_FORMAT,
                usage: wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("julia_frame_readback"),
                size: staging_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            GpuSurface {
                size,
                texture,
                view,
                staging,
                padded_bytes_per_row,
                pending_map: RefCell::new(None),
            }
        });

        match err {
            Some(e) => Err(FractalError::allocation(e.to_string())),
            None => Ok(surface),
        }
    }

    fn fill(&self, surface: &GpuSurface, color: Rgba8) -> FractalResult<()> {
        let rgba = color.to_array();
        let mut data = vec![0u8; rgba_len(surface.size)?];
        for px in data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        let ((), err) = self.scoped(|| {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &surface.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(surface.size * 4),
                    rows_per_image: Some(surface.size),
                },
                wgpu::Extent3d {
                    width: surface.size,
                    height: surface.size,
                    depth_or_array_layers: 1,
                },
            );
        });
        match err {
            Some(e) => Err(FractalError::allocation(format!("surface fill: {e}"))),
            None => Ok(()),
        }
    }

    fn create_shared(
        &self,
        program: &GpuProgram,
        field: &FieldSpec,
        palette: &ColorPalette,
    ) -> FractalResult<GpuShared> {
        if field.samples == 0 {
            return Err(FractalError::allocation(
                "coordinate buffers need at least one sample",
            ));
        }
        let coord_bytes = u64::from(field.samples) * 4;
        let (shared, err) = self.scoped(|| {
            let coord_buffer = |label: &str| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size: coord_bytes,
                    usage: wgpu::BufferUsages::STORAGE,
                    mapped_at_creation: false,
                })
            };
            let re = coord_buffer("julia_coords_re");
            let im = coord_buffer("julia_coords_im");
            let cmap = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("julia_cmap"),
                    contents: &palette.to_device_bytes(),
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                });
            let field_uniform = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("julia_field_params"),
                    contents: &field.to_device_bytes(),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let field_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("julia_field_bg"),
                layout: &program.field_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: re.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: im.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 7,
                        resource: field_uniform.as_entire_binding(),
                    },
                ],
            });
            let (weight_min, weight_max) = palette.domain();
            GpuShared {
                samples: field.samples,
                cmap_len: palette.len() as u32,
                domain: (weight_min as f32, weight_max as f32),
                re,
                im,
                cmap,
                field_group,
            }
        });
        match err {
            Some(e) => Err(FractalError::allocation(e.to_string())),
            None => Ok(shared),
        }
    }

    fn write_palette(&self, shared: &GpuShared, palette: &ColorPalette) -> FractalResult<()> {
        if palette.len() as u32 != shared.cmap_len {
            return Err(FractalError::validation(format!(
                "palette buffer holds {} colors, got {}",
                shared.cmap_len,
                palette.len()
            )));
        }
        let ((), err) = self.scoped(|| {
            self.queue
                .write_buffer(&shared.cmap, 0, &palette.to_device_bytes());
        });
        match err {
            Some(e) => Err(FractalError::allocation(format!("palette upload: {e}"))),
            None => Ok(()),
        }
    }

    fn enqueue_coordinates(&self, program: &GpuProgram, shared: &GpuShared) -> FractalResult<()> {
        let ((), err) = self.scoped(|| {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("julia_coords_encoder"),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("julia_coords_pass"),
                    timestamp_writes: None,
                });
                let groups = shared.samples.div_ceil(FIELD_WORKGROUP);
                pass.set_bind_group(0, &shared.field_group, &[]);
                pass.set_pipeline(&program.even_re);
                pass.dispatch_workgroups(groups, 1, 1);
                pass.set_pipeline(&program.even_im);
                pass.dispatch_workgroups(groups, 1, 1);
            }
            self.queue.submit(Some(encoder.finish()));
        });
        match err {
            Some(e) => Err(FractalError::dispatch(format!("coordinate kernels: {e}"))),
            None => Ok(()),
        }
    }

    fn bind(
        &self,
        program: &GpuProgram,
        surface: &GpuSurface,
        shared: &GpuShared,
        param: JuliaParam,
        max_iterations: u32,
    ) -> FractalResult<GpuBinding> {
        let uniform = FrameUniform::from_shared(
            param,
            surface.size,
            max_iterations,
            shared.domain,
            shared.cmap_len,
        );
        let (binding, err) = self.scoped(|| {
            let uniform = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("julia_frame_params"),
                    contents: &uniform.to_device_bytes(),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("julia_frame_bg"),
                layout: &program.frame_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&surface.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: shared.re.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: shared.im.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: shared.cmap.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: uniform.as_entire_binding(),
                    },
                ],
            });
            GpuBinding {
                size: surface.size,
                pipeline: program.render.clone(),
                group,
                _uniform: uniform,
            }
        });
        match err {
            Some(e) => Err(FractalError::allocation(format!("frame binding: {e}"))),
            None => Ok(binding),
        }
    }

    fn dispatch(&self, binding: &GpuBinding) -> FractalResult<()> {
        let ((), err) = self.scoped(|| {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("julia_render_encoder"),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("julia_render_pass"),
                    timestamp_writes: None,
                });
                let groups = binding.size.div_ceil(RENDER_WORKGROUP);
                pass.set_pipeline(&binding.pipeline);
                pass.set_bind_group(0, &binding.group, &[]);
                pass.dispatch_workgroups(groups, groups, 1);
            }
            self.queue.submit(Some(encoder.finish()));
        });
        match err {
            Some(e) => Err(FractalError::dispatch(e.to_string())),
            None => Ok(()),
        }
    }

    fn enqueue_readback(&self, surface: &GpuSurface) -> FractalResult<()> {
        let ((), err) = self.scoped(|| {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("julia_readback_encoder"),
                });
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &surface.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &surface.staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(surface.padded_bytes_per_row),
                        rows_per_image: Some(surface.size),
                    },
                },
                wgpu::Extent3d {
                    width: surface.size,
                    height: surface.size,
                    depth_or_array_layers: 1,
                },
            );
            self.queue.submit(Some(encoder.finish()));
        });
        if let Some(e) = err {
            return Err(FractalError::readback(e.to_string()));
        }

        let (tx, rx) = mpsc::channel();
        surface
            .staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |res| {
                let _ = tx.send(res);
            });
        *surface.pending_map.borrow_mut() = Some(rx);
        Ok(())
    }

    fn finish(&self) -> FractalResult<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| FractalError::barrier(format!("wgpu poll failed: {e:?}")))?;
        Ok(())
    }

    fn read_pixels(&self, surface: &GpuSurface, out: &mut Vec<u8>) -> FractalResult<()> {
        let rx = surface
            .pending_map
            .borrow_mut()
            .take()
            .ok_or_else(|| FractalError::readback("no readback was enqueued for this surface"))?;
        match rx.try_recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(FractalError::readback(format!("map failed: {e}"))),
            Err(TryRecvError::Empty) => {
                return Err(FractalError::readback(
                    "readback not complete; the queue was not drained",
                ));
            }
            Err(TryRecvError::Disconnected) => {
                return Err(FractalError::readback("readback channel closed"));
            }
        }

        let row_bytes = surface.size as usize * 4;
        let padded = surface.padded_bytes_per_row as usize;
        out.clear();
        out.reserve(row_bytes * surface.size as usize);
        {
            let mapped = surface.staging.slice(..).get_mapped_range();
            for row in 0..surface.size as usize {
                let start = row * padded;
                out.extend_from_slice(&mapped[start..start + row_bytes]);
            }
        }
        surface.staging.unmap();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_pad_to_copy_alignment() {
        assert_eq!(align_to(4, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(3000 * 4, 256), 12032);
    }
}
