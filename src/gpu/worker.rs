// gpu/worker.rs — wgpu device context ("worker").
//
// A Worker owns one device, one in-order command queue and a cache of
// compiled compute pipelines keyed by kernel name. It owns no data
// buffers; states are created against it and borrow its device per call.
//
// ADAPTER SELECTION
// ──────────────────
// wgpu's default `request_adapter` power-preference heuristics may grab
// llvmpipe/softpipe on headless boxes where the software renderer appears
// as a valid Vulkan device. We enumerate explicitly and use tiered
// selection: real hardware first, virtual/other second, software last.
//
// SYNCHRONIZATION
// ────────────────
// Dispatches are asynchronous and pipelined; the queue executes them in
// FIFO order. `finish()` is the only blocking operation — the host calls
// it between phases whose buffer counts it needs to observe.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use log::info;

/// Cached adapter information for logging and device selection.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {:?})",
            self.name, self.backend, self.device_type
        )
    }
}

/// One accelerator execution context: device, queue, kernel cache.
///
/// Create one per device and keep it for the whole pipeline run; it is
/// expensive to construct (Vulkan instance + device initialization).
/// Workers are handed out as `Rc` — the host is single-threaded and
/// states/steps reference their worker liberally.
pub struct Worker {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    /// Compiled compute pipelines keyed by kernel name.
    pipelines: RefCell<HashMap<String, Rc<wgpu::ComputePipeline>>>,
    /// Keeps the `wgpu::Instance` alive until `device` and `queue` are
    /// dropped (declared last: struct fields drop in declaration order).
    _instance: Arc<wgpu::Instance>,
}

impl Worker {
    /// Create a Worker on the best available Vulkan adapter.
    pub fn new() -> Result<Rc<Worker>, GpuError> {
        let instance = Arc::new(make_instance());
        let adapters = instance.enumerate_adapters(wgpu::Backends::VULKAN);
        if adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }
        for a in &adapters {
            let i = a.get_info();
            info!("Vulkan adapter: {} ({:?}, {:?})", i.name, i.backend, i.device_type);
        }

        // Tier 1: real or virtual hardware. Tier 2: take anything.
        let adapter = adapters
            .into_iter()
            .find(|a| {
                !matches!(a.get_info().device_type, wgpu::DeviceType::Cpu)
            })
            .or_else(|| {
                instance
                    .enumerate_adapters(wgpu::Backends::VULKAN)
                    .into_iter()
                    .next()
            })
            .ok_or(GpuError::NoSuitableAdapter)?;

        Ok(Rc::new(Self::for_adapter(instance, adapter)?))
    }

    /// Create one Worker per enumerable adapter, in enumeration order.
    /// Adapters whose device request fails are skipped with a log entry —
    /// a broken driver must not prevent the remaining devices from running.
    pub fn all() -> Result<Vec<Rc<Worker>>, GpuError> {
        let instance = Arc::new(make_instance());
        let adapters = instance.enumerate_adapters(wgpu::Backends::VULKAN);
        if adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }
        let mut workers = Vec::new();
        for adapter in adapters {
            let name = adapter.get_info().name.clone();
            match Self::for_adapter(instance.clone(), adapter) {
                Ok(w) => workers.push(Rc::new(w)),
                Err(e) => log::warn!("skipping adapter {name}: {e}"),
            }
        }
        if workers.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }
        Ok(workers)
    }

    /// Construct from a selected adapter.
    pub fn for_adapter(
        instance: Arc<wgpu::Instance>,
        adapter: wgpu::Adapter,
    ) -> Result<Worker, GpuError> {
        let raw = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw.name.clone(),
            vendor: raw.vendor,
            device: raw.device,
            device_type: raw.device_type,
            backend: raw.backend,
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = pollster::block_on(
            adapter.request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("relpose"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            ),
        )
        .map_err(GpuError::DeviceRequest)?;

        info!("worker on {adapter_info}");

        Ok(Worker {
            device,
            queue,
            adapter_info,
            pipelines: RefCell::new(HashMap::new()),
            _instance: instance,
        })
    }

    /// Compile a kernel (or return the cached pipeline for this name).
    ///
    /// A compile failure is fatal for this device's pipeline run and is
    /// propagated; the caller may still try other devices.
    pub fn compile(
        &self,
        name: &str,
        source: &str,
        entry: &str,
    ) -> Result<Rc<wgpu::ComputePipeline>, GpuError> {
        if let Some(p) = self.pipelines.borrow().get(name) {
            return Ok(p.clone());
        }

        // Error scope turns naga/driver validation failures into a Result
        // instead of an uncaptured-error panic.
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: None,
                module: &module,
                entry_point: entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::KernelBuild {
                name: name.to_string(),
                message: err.to_string(),
            });
        }

        let pipeline = Rc::new(pipeline);
        self.pipelines
            .borrow_mut()
            .insert(name.to_string(), pipeline.clone());
        Ok(pipeline)
    }

    /// Submit an encoded command buffer (non-blocking).
    pub fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Block until all previously enqueued work on this worker's queue has
    /// completed. Buffer counts read on the host are valid only after this.
    pub fn finish(&self) {
        self.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
        self.device.poll(wgpu::Maintain::Wait);
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker {{ {} }}", self.adapter_info)
    }
}

fn make_instance() -> wgpu::Instance {
    // Vulkan only — no DX12, no Metal, no WebGPU. Non-conformant adapters
    // (e.g. dzn on WSL2) are enumerated so compute-only workloads can still
    // run on them; validation is enabled in debug builds for shader error
    // feedback.
    let flags = if cfg!(debug_assertions) {
        wgpu::InstanceFlags::VALIDATION
            | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    } else {
        wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    };
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        flags,
        ..Default::default()
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from device setup, kernel compilation and pipeline wiring.
#[derive(Debug)]
pub enum GpuError {
    /// No Vulkan adapter found. Check that Vulkan is installed and
    /// `vulkaninfo` lists a device.
    NoSuitableAdapter,
    /// wgpu device request failed (driver issue, unsupported limits, ...).
    DeviceRequest(wgpu::RequestDeviceError),
    /// A kernel failed to compile for this device.
    KernelBuild { name: String, message: String },
    /// The pipeline wiring failed validation before first execution.
    Wiring(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoSuitableAdapter => {
                write!(f, "no Vulkan adapter found (is Vulkan installed?)")
            }
            GpuError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            GpuError::KernelBuild { name, message } => {
                write!(f, "kernel {name:?} failed to compile: {message}")
            }
            GpuError::Wiring(msg) => write!(f, "pipeline wiring invalid: {msg}"),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceRequest(e) => Some(e),
            _ => None,
        }
    }
}
