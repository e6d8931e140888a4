//! Accumulation-target backend on wgpu.
//!
//! The field lives in three `R32Float` render targets rotated through a
//! [`BufferRing`]. One tick records up to three render passes into a single
//! command buffer:
//!
//! 1. stamp: queued stimuli drawn as geometry into slot 0, replacing values
//! 2. step: full-screen pass reading slots 0 and 2, writing slot 1
//! 3. encode: full-screen pass reading the new slot 0, writing the
//!    `Rgba8Unorm` output texture
//!
//! Texel loads clamp to the grid, which gives the same edge replication
//! as the ghost border of the CPU field.
//!
//! ## Failure handling
//!
//! Setup and every submission run inside validation and out-of-memory error
//! scopes. A captured error surfaces as [`FrostError::Capability`] so the
//! simulation can drop to the CPU path for good.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::backend::{BackendKind, Capabilities, FrostBackend, TextureRef};
use super::height::GridSize;
use super::kernel::WaveParams;
use super::raster::{Point, Primitive, StimulusEvent};
use super::ring::BufferRing;
use super::texture::{NormalHeightTexture, TEXEL_BYTES};
use crate::error::{FrostError, Result};

/// Format of the height slots.
pub const FIELD_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// Format of the encoded normal/height texture.
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Queued stimulus vertices that force a stamp pass ahead of the next step.
const MAX_QUEUED_STAMP_VERTICES: usize = 1 << 16;

/// Stimulus stamping: cell-space geometry written straight into the field.
const WGSL_STAMP_SHADER: &str = r#"
struct StampParams {
    grid: vec2<f32>,
    _pad: vec2<f32>,
}

@group(0) @binding(0) var<uniform> params: StampParams;

struct StampOut {
    @builtin(position) position: vec4<f32>,
    @location(0) @interpolate(flat) magnitude: f32,
}

@vertex
fn vs_stamp(@location(0) cell: vec2<f32>, @location(1) magnitude: f32) -> StampOut {
    var out: StampOut;
    out.position = vec4<f32>(
        cell.x / params.grid.x * 2.0 - 1.0,
        1.0 - cell.y / params.grid.y * 2.0,
        0.0,
        1.0
    );
    out.magnitude = magnitude;
    return out;
}

@fragment
fn fs_stamp(stamp: StampOut) -> @location(0) vec4<f32> {
    return vec4<f32>(stamp.magnitude, 0.0, 0.0, 0.0);
}
"#;

/// One oversized triangle covering the whole target.
const WGSL_FULLSCREEN_VERTEX: &str = r#"
@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}
"#;

/// Leapfrog step of the damped wave equation.
const WGSL_STEP_SHADER: &str = r#"
struct StepParams {
    size: vec2<i32>,
    dt_scaled: f32,
    fade: f32,
}

@group(0) @binding(0) var<uniform> params: StepParams;
@group(0) @binding(1) var current_field: texture_2d<f32>;
@group(0) @binding(2) var older_field: texture_2d<f32>;

// Cells past the border read the nearest edge cell
fn current_at(p: vec2<i32>) -> f32 {
    let q = clamp(p, vec2<i32>(0, 0), params.size - vec2<i32>(1, 1));
    return textureLoad(current_field, q, 0).r;
}

@fragment
fn fs_step(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let p = vec2<i32>(frag.xy);
    let c = current_at(p);
    let north = current_at(p + vec2<i32>(0, -1));
    let south = current_at(p + vec2<i32>(0, 1));
    let west = current_at(p + vec2<i32>(-1, 0));
    let east = current_at(p + vec2<i32>(1, 0));
    let lap = north + south + west + east - 4.0 * c;

    let older = textureLoad(older_field, p, 0).r;
    let h = clamp((2.0 * c - older + params.dt_scaled * lap) * params.fade, -1.0, 1.0);
    return vec4<f32>(h, 0.0, 0.0, 0.0);
}
"#;

/// Height and central-difference normal packed into RGBA.
const WGSL_ENCODE_SHADER: &str = r#"
struct EncodeParams {
    size: vec2<i32>,
    gain: f32,
    _pad: f32,
}

@group(0) @binding(0) var<uniform> params: EncodeParams;
@group(0) @binding(1) var height_field: texture_2d<f32>;

fn height_at(p: vec2<i32>) -> f32 {
    let q = clamp(p, vec2<i32>(0, 0), params.size - vec2<i32>(1, 1));
    return textureLoad(height_field, q, 0).r;
}

@fragment
fn fs_encode(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let p = vec2<i32>(frag.xy);
    let h = height_at(p);
    let nx = (height_at(p + vec2<i32>(1, 0)) - height_at(p - vec2<i32>(1, 0))) * params.gain;
    let ny = (height_at(p + vec2<i32>(0, 1)) - height_at(p - vec2<i32>(0, 1))) * params.gain;
    let inv = 0.5 / sqrt(nx * nx + ny * ny + 1.0);
    return vec4<f32>(inv + 0.5, ny * inv + 0.5, nx * inv + 0.5, h);
}
"#;

/// Stamp vertex (must match the WGSL vertex inputs).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct StampVertex {
    cell: [f32; 2],
    magnitude: f32,
}

impl StampVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<StampVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }

    /// Vertex on the centre of a cell.
    fn centre(p: Point, magnitude: f32) -> Self {
        Self {
            cell: [p.x as f32 + 0.5, p.y as f32 + 0.5],
            magnitude,
        }
    }
}

/// Parameters for the stamp shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct StampParams {
    grid: [f32; 2],
    _pad: [f32; 2],
}

/// Parameters for the step shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct StepParams {
    size: [i32; 2],
    dt_scaled: f32,
    fade: f32,
}

/// Parameters for the encode shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct EncodeParams {
    size: [i32; 2],
    gain: f32,
    _pad: f32,
}

/// Shared device, queue and adapter capabilities.
pub struct GpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    capabilities: Capabilities,
    adapter_name: String,
}

impl GpuContext {
    /// Request a headless adapter and device.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| FrostError::unavailable("No WebGPU adapter found"))?;

        let info = adapter.get_info();
        tracing::info!("Frost GPU adapter: {} ({:?})", info.name, info.backend);

        let capabilities = probe_capabilities(&adapter);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Frost Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| FrostError::unavailable(format!("Failed to create device: {}", e)))?;

        device.on_uncaptured_error(Box::new(|error| {
            tracing::error!("Uncaptured wgpu error: {}", error);
        }));

        Ok(Self::from_parts(
            Arc::new(device),
            Arc::new(queue),
            capabilities,
            info.name,
        ))
    }

    /// Wrap a device the host already owns.
    ///
    /// The host's uncaptured-error handler stays installed. Frost work runs
    /// inside error scopes, so its own failures never reach that handler.
    pub fn from_parts(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        capabilities: Capabilities,
        adapter_name: impl Into<String>,
    ) -> Self {
        Self {
            device,
            queue,
            capabilities,
            adapter_name: adapter_name.into(),
        }
    }

    /// The device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// What the adapter supports.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Adapter name, for logs.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Run `f` inside validation and out-of-memory error scopes.
    fn guarded<T>(&self, what: &str, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let value = f(&self.device);

        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        match validation.or(out_of_memory) {
            Some(error) => Err(FrostError::capability(format!("{}: {}", what, error))),
            None => Ok(value),
        }
    }
}

/// Check that both ring and output formats can be rendered to and sampled.
fn probe_capabilities(adapter: &wgpu::Adapter) -> Capabilities {
    let renderable = |format: wgpu::TextureFormat| {
        adapter
            .get_texture_format_features(format)
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING)
    };

    Capabilities {
        render_targets: renderable(FIELD_FORMAT) && renderable(OUTPUT_FORMAT),
        // WGSL is always available; compile failures are caught at setup
        fragment_programs: true,
    }
}

fn extent(size: GridSize) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

fn create_texture(
    device: &wgpu::Device,
    label: &str,
    size: GridSize,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    })
}

fn begin_pass<'a>(
    encoder: &'a mut wgpu::CommandEncoder,
    target: &'a wgpu::TextureView,
    label: &str,
    load: wgpu::LoadOp<wgpu::Color>,
) -> wgpu::RenderPass<'a> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn field_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

/// Full-screen pass pipeline writing a single colour target.
fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    fragment_source: &str,
    fragment_entry: &str,
    bind_group_layout: &wgpu::BindGroupLayout,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(
            format!("{}{}", WGSL_FULLSCREEN_VERTEX, fragment_source).into(),
        ),
    });

    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: "vs_fullscreen",
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: fragment_entry,
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

/// Copy a whole texture to host memory, dropping row padding.
fn read_back(
    context: &GpuContext,
    mut encoder: wgpu::CommandEncoder,
    texture: &wgpu::Texture,
    size: GridSize,
) -> Result<Vec<u8>> {
    let row_bytes = size.width * TEXEL_BYTES as u32;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded_row_bytes = row_bytes.div_ceil(align) * align;

    let staging = context.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Frost Readback Staging"),
        size: padded_row_bytes as u64 * size.height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_row_bytes),
                rows_per_image: Some(size.height),
            },
        },
        extent(size),
    );

    context
        .guarded("readback", |_| {
            context.queue.submit(Some(encoder.finish()));
        })
        .map_err(|e| FrostError::transfer(e.to_string()))?;

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    context.device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| FrostError::transfer(format!("Map callback dropped: {}", e)))?
        .map_err(|e| FrostError::transfer(format!("Map failed: {:?}", e)))?;

    let mapped = slice.get_mapped_range();
    let mut data = Vec::with_capacity(row_bytes as usize * size.height as usize);
    for row in mapped.chunks_exact(padded_row_bytes as usize) {
        data.extend_from_slice(&row[..row_bytes as usize]);
    }
    drop(mapped);
    staging.unmap();

    Ok(data)
}

/// One slot of the ring.
struct FieldSlot {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl FieldSlot {
    fn new(device: &wgpu::Device, size: GridSize, index: usize) -> Self {
        let texture = create_texture(
            device,
            &format!("Frost Field {}", index),
            size,
            FIELD_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// GPU render-target accumulation backend.
pub struct AccumulationBackend {
    /// Device and queue.
    context: Arc<GpuContext>,
    /// Grid dimensions.
    size: GridSize,
    /// Height slots.
    ring: BufferRing<FieldSlot>,
    /// Encoded normal/height texture.
    output: wgpu::Texture,
    output_view: wgpu::TextureView,
    /// Stimulus pipeline.
    stamp_pipeline: wgpu::RenderPipeline,
    stamp_bind_group: wgpu::BindGroup,
    /// Step pipeline.
    step_pipeline: wgpu::RenderPipeline,
    step_bind_group_layout: wgpu::BindGroupLayout,
    step_params: wgpu::Buffer,
    /// Encode pipeline.
    encode_pipeline: wgpu::RenderPipeline,
    encode_bind_group_layout: wgpu::BindGroupLayout,
    encode_params: wgpu::Buffer,
    /// Stimulus geometry not yet drawn.
    stamps: Vec<StampVertex>,
    /// Commands recorded by `step` and submitted by `encode`.
    pending: Option<wgpu::CommandEncoder>,
}

impl AccumulationBackend {
    /// Create the ring, the output texture and all pipelines.
    ///
    /// Fails with [`FrostError::BackendUnavailable`] when the adapter lacks
    /// the formats and with [`FrostError::Capability`] when any resource
    /// or pipeline is rejected.
    pub fn new(context: Arc<GpuContext>, size: GridSize, normal_gain: f32) -> Result<Self> {
        if !context.capabilities().supports_accumulation() {
            return Err(FrostError::unavailable(format!(
                "{} cannot render to {:?} and {:?} targets",
                context.adapter_name(),
                FIELD_FORMAT,
                OUTPUT_FORMAT
            )));
        }

        let limit = context.device.limits().max_texture_dimension_2d;
        if size.width > limit || size.height > limit {
            return Err(FrostError::capability(format!(
                "{}x{} grid exceeds the {} texel texture limit",
                size.width, size.height, limit
            )));
        }

        let shared = Arc::clone(&context);
        let mut backend = context.guarded("accumulation target setup", |device| {
            Self::create(shared, device, size, normal_gain)
        })?;

        // Flat texture before the first tick
        backend.encode()?;

        tracing::debug!(
            "Accumulation backend ready: {}x{} on {}",
            size.width,
            size.height,
            context.adapter_name()
        );

        Ok(backend)
    }

    fn create(
        context: Arc<GpuContext>,
        device: &wgpu::Device,
        size: GridSize,
        normal_gain: f32,
    ) -> Self {
        let ring = BufferRing::new(std::array::from_fn(|i| FieldSlot::new(device, size, i)));

        let output = create_texture(
            device,
            "Frost Normal/Height Texture",
            size,
            OUTPUT_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        );
        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());

        let grid_i32 = [size.width as i32, size.height as i32];

        // Stamp pipeline
        let stamp_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Frost Stamp Shader"),
            source: wgpu::ShaderSource::Wgsl(WGSL_STAMP_SHADER.into()),
        });

        let stamp_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Frost Stamp Bind Group Layout"),
                entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX)],
            });

        let stamp_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Frost Stamp Pipeline Layout"),
            bind_group_layouts: &[&stamp_bind_group_layout],
            push_constant_ranges: &[],
        });

        let stamp_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Frost Stamp Pipeline"),
            layout: Some(&stamp_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &stamp_module,
                entry_point: "vs_stamp",
                buffers: &[StampVertex::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &stamp_module,
                entry_point: "fs_stamp",
                targets: &[Some(wgpu::ColorTargetState {
                    format: FIELD_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let stamp_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frost Stamp Params"),
            contents: bytemuck::bytes_of(&StampParams {
                grid: [size.width as f32, size.height as f32],
                _pad: [0.0; 2],
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let stamp_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frost Stamp Bind Group"),
            layout: &stamp_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: stamp_params.as_entire_binding(),
            }],
        });

        // Step pipeline
        let step_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Frost Step Bind Group Layout"),
                entries: &[
                    uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                    field_entry(1),
                    field_entry(2),
                ],
            });

        let step_pipeline = fullscreen_pipeline(
            device,
            "Frost Step Pipeline",
            WGSL_STEP_SHADER,
            "fs_step",
            &step_bind_group_layout,
            FIELD_FORMAT,
        );

        let step_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frost Step Params"),
            size: std::mem::size_of::<StepParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Encode pipeline
        let encode_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Frost Encode Bind Group Layout"),
                entries: &[uniform_entry(0, wgpu::ShaderStages::FRAGMENT), field_entry(1)],
            });

        let encode_pipeline = fullscreen_pipeline(
            device,
            "Frost Encode Pipeline",
            WGSL_ENCODE_SHADER,
            "fs_encode",
            &encode_bind_group_layout,
            OUTPUT_FORMAT,
        );

        let encode_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frost Encode Params"),
            contents: bytemuck::bytes_of(&EncodeParams {
                size: grid_i32,
                gain: normal_gain,
                _pad: 0.0,
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        Self {
            context,
            size,
            ring,
            output,
            output_view,
            stamp_pipeline,
            stamp_bind_group,
            step_pipeline,
            step_bind_group_layout,
            step_params,
            encode_pipeline,
            encode_bind_group_layout,
            encode_params,
            stamps: Vec::new(),
            pending: None,
        }
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        self.pending.take().unwrap_or_else(|| {
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frost Tick Encoder"),
                })
        })
    }

    /// Draw queued stimuli into slot 0.
    fn record_stamps(&mut self, encoder: &mut wgpu::CommandEncoder) {
        if self.stamps.is_empty() {
            return;
        }

        let vertices = self
            .context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Frost Stamp Vertices"),
                contents: bytemuck::cast_slice(&self.stamps),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let count = self.stamps.len() as u32;
        self.stamps.clear();

        let mut pass = begin_pass(
            encoder,
            &self.ring.slot(0).view,
            "Frost Stamp Pass",
            wgpu::LoadOp::Load,
        );
        pass.set_pipeline(&self.stamp_pipeline);
        pass.set_bind_group(0, &self.stamp_bind_group, &[]);
        pass.set_vertex_buffer(0, vertices.slice(..));
        pass.draw(0..count, 0..1);
    }

    /// Draw queued stimuli now instead of at the next step.
    fn flush_stamps(&mut self) -> Result<()> {
        let mut encoder = self.take_encoder();
        self.record_stamps(&mut encoder);
        self.submit(encoder, "frost stamp flush")
    }

    fn submit(&self, encoder: wgpu::CommandEncoder, what: &str) -> Result<()> {
        self.context.guarded(what, |_| {
            self.context.queue.submit(Some(encoder.finish()));
        })
    }
}

/// Two triangles covering the cells `[x, x + w) × [y, y + h)`.
fn push_rect(stamps: &mut Vec<StampVertex>, x: i32, y: i32, w: i32, h: i32, magnitude: f32) {
    let (x0, y0) = (x as f32, y as f32);
    let (x1, y1) = ((x + w) as f32, (y + h) as f32);
    let corner = |cx: f32, cy: f32| StampVertex {
        cell: [cx, cy],
        magnitude,
    };
    stamps.extend_from_slice(&[
        corner(x0, y0),
        corner(x1, y0),
        corner(x1, y1),
        corner(x0, y0),
        corner(x1, y1),
        corner(x0, y1),
    ]);
}

impl FrostBackend for AccumulationBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Accumulation
    }

    fn size(&self) -> GridSize {
        self.size
    }

    fn rasterize(&mut self, event: &StimulusEvent) -> Result<()> {
        let magnitude = event.magnitude();
        let size = self.size;
        let stamps = &mut self.stamps;

        match event.primitive() {
            Primitive::Point => {
                for p in event.points() {
                    push_rect(stamps, p.x - 1, p.y - 1, 3, 3, magnitude);
                }
            }
            Primitive::Line => {
                event.for_each_cell(size, |x, y| push_rect(stamps, x, y, 1, 1, magnitude));
            }
            Primitive::Triangle => {
                stamps.extend(
                    event
                        .points()
                        .iter()
                        .map(|p| StampVertex::centre(*p, magnitude)),
                );
            }
        }

        if self.stamps.len() >= MAX_QUEUED_STAMP_VERTICES {
            self.flush_stamps()?;
        }
        Ok(())
    }

    fn step(&mut self, params: &WaveParams) -> Result<()> {
        let mut encoder = self.take_encoder();
        self.record_stamps(&mut encoder);

        let step_params = StepParams {
            size: [self.size.width as i32, self.size.height as i32],
            dt_scaled: params.dt_scaled,
            fade: params.fade,
        };
        self.context
            .queue
            .write_buffer(&self.step_params, 0, bytemuck::bytes_of(&step_params));

        let bind_group = self
            .context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Frost Step Bind Group"),
                layout: &self.step_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.step_params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&self.ring.slot(0).view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&self.ring.slot(2).view),
                    },
                ],
            });

        {
            let mut pass = begin_pass(
                &mut encoder,
                &self.ring.slot(1).view,
                "Frost Step Pass",
                wgpu::LoadOp::Clear(wgpu::Color::BLACK),
            );
            pass.set_pipeline(&self.step_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        self.ring.rotate();
        self.pending = Some(encoder);
        Ok(())
    }

    fn encode(&mut self) -> Result<()> {
        let mut encoder = self.take_encoder();
        self.record_stamps(&mut encoder);

        let bind_group = self
            .context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Frost Encode Bind Group"),
                layout: &self.encode_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.encode_params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&self.ring.slot(0).view),
                    },
                ],
            });

        {
            let mut pass = begin_pass(
                &mut encoder,
                &self.output_view,
                "Frost Encode Pass",
                wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            );
            pass.set_pipeline(&self.encode_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        self.submit(encoder, "frost tick")
    }

    fn texture(&self) -> TextureRef<'_> {
        TextureRef::Device(&self.output)
    }

    fn read_texture(&mut self) -> Result<NormalHeightTexture> {
        let encoder = self.take_encoder();
        let data = read_back(&self.context, encoder, &self.output, self.size)?;
        Ok(NormalHeightTexture::from_raw(self.size, data))
    }

    fn read_heights(&mut self) -> Result<Vec<f32>> {
        let mut encoder = self.take_encoder();
        self.record_stamps(&mut encoder);
        let data = read_back(&self.context, encoder, &self.ring.slot(0).texture, self.size)?;
        Ok(data
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

impl Drop for AccumulationBackend {
    fn drop(&mut self) {
        for slot in self.ring.iter() {
            slot.texture.destroy();
        }
        self.output.destroy();
    }
}

/// Device texture fed from host bytes, used by the CPU backend.
pub struct DeviceTexture {
    context: Arc<GpuContext>,
    texture: wgpu::Texture,
}

impl DeviceTexture {
    /// Allocate an `Rgba8Unorm` texture of the grid size.
    pub fn new(context: Arc<GpuContext>, size: GridSize) -> Self {
        let texture = create_texture(
            &context.device,
            "Frost Uploaded Normal/Height Texture",
            size,
            OUTPUT_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        Self { context, texture }
    }

    /// Replace the texture contents.
    pub fn upload(&self, source: &NormalHeightTexture) {
        let size = extent(GridSize {
            width: source.width(),
            height: source.height(),
        });
        self.context.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            source.as_bytes(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(source.width() * TEXEL_BYTES as u32),
                rows_per_image: Some(source.height()),
            },
            size,
        );
    }

    /// The device texture.
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

impl Drop for DeviceTexture {
    fn drop(&mut self) {
        self.texture.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_covers_cell_centres() {
        let mut stamps = Vec::new();
        push_rect(&mut stamps, 2, 3, 1, 1, 0.5);
        assert_eq!(stamps.len(), 6);
        assert!(stamps.iter().all(|v| v.magnitude == 0.5));

        let xs: Vec<f32> = stamps.iter().map(|v| v.cell[0]).collect();
        let ys: Vec<f32> = stamps.iter().map(|v| v.cell[1]).collect();
        assert_eq!(xs.iter().cloned().fold(f32::MAX, f32::min), 2.0);
        assert_eq!(xs.iter().cloned().fold(f32::MIN, f32::max), 3.0);
        assert_eq!(ys.iter().cloned().fold(f32::MAX, f32::min), 3.0);
        assert_eq!(ys.iter().cloned().fold(f32::MIN, f32::max), 4.0);
    }

    #[test]
    fn test_triangle_vertices_on_cell_centres() {
        let v = StampVertex::centre(Point::new(4, 7), -0.25);
        assert_eq!(v.cell, [4.5, 7.5]);
        assert_eq!(v.magnitude, -0.25);
    }

    #[test]
    fn test_uniform_layouts() {
        assert_eq!(std::mem::size_of::<StampVertex>(), 12);
        assert_eq!(std::mem::size_of::<StampParams>(), 16);
        assert_eq!(std::mem::size_of::<StepParams>(), 16);
        assert_eq!(std::mem::size_of::<EncodeParams>(), 16);
    }

    #[tokio::test]
    #[ignore] // Requires GPU
    async fn test_accumulation_backend_creation() {
        let context = Arc::new(GpuContext::new().await.unwrap());
        let size = GridSize::new(32, 16).unwrap();
        let mut backend = AccumulationBackend::new(context, size, 1.5).unwrap();

        assert_eq!(backend.kind(), BackendKind::Accumulation);
        let texture = backend.read_texture().unwrap();
        assert_eq!(texture.texel(0, 0), [255, 128, 128, 0]);
        assert!(backend.read_heights().unwrap().iter().all(|h| *h == 0.0));
    }

    #[tokio::test]
    #[ignore] // Requires GPU
    async fn test_stamps_visible_before_step() {
        let context = Arc::new(GpuContext::new().await.unwrap());
        let size = GridSize::new(16, 16).unwrap();
        let mut backend = AccumulationBackend::new(context, size, 1.5).unwrap();

        backend
            .rasterize(&StimulusEvent::point(Point::new(5, 5), 0.75).unwrap())
            .unwrap();
        let heights = backend.read_heights().unwrap();

        let covered = heights.iter().filter(|h| **h == 0.75).count();
        assert_eq!(covered, 9);
        assert_eq!(heights[5 * 16 + 5], 0.75);
    }

    #[tokio::test]
    #[ignore] // Requires GPU
    async fn test_stamp_queue_stays_bounded() {
        let context = Arc::new(GpuContext::new().await.unwrap());
        let size = GridSize::new(16, 16).unwrap();
        let mut backend = AccumulationBackend::new(context, size, 1.5).unwrap();

        let wipe = |magnitude| {
            StimulusEvent::triangle(
                Point::new(-20, -20),
                Point::new(60, -20),
                Point::new(-20, 60),
                magnitude,
            )
            .unwrap()
        };
        for i in 0..30_000 {
            backend.rasterize(&wipe((i % 5) as f32 * 0.1)).unwrap();
            assert!(backend.stamps.len() < MAX_QUEUED_STAMP_VERTICES);
        }
        backend.rasterize(&wipe(0.25)).unwrap();

        // Flushed and queued stamps land in call order
        let heights = backend.read_heights().unwrap();
        assert!(heights.iter().all(|h| *h == 0.25));
    }

    #[tokio::test]
    #[ignore] // Requires GPU
    async fn test_from_parts_keeps_host_error_handler() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .unwrap();
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .unwrap();

        let reported = Arc::new(AtomicBool::new(false));
        let flag = reported.clone();
        device.on_uncaptured_error(Box::new(move |_| {
            flag.store(true, Ordering::SeqCst);
        }));

        let context = GpuContext::from_parts(
            Arc::new(device),
            Arc::new(queue),
            Capabilities::all(),
            "host",
        );

        // Mappable for both read and write is a validation error
        let _invalid = context.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Invalid Host Buffer"),
            size: 16,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::MAP_WRITE,
            mapped_at_creation: false,
        });
        context.device().poll(wgpu::Maintain::Wait);

        assert!(reported.load(Ordering::SeqCst));
    }
}
