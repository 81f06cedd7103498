//! Device side collaborators: devices, command queues and the program
//! builder.
//!
//! The solver never talks to an OpenCL driver directly. Everything it needs
//! from one goes through the traits below; [`mem`] provides in-memory
//! implementations that record what would have been launched.

use std::sync::Arc;

use kgen_blas::{ImageId, KernelArgs};

use crate::cache::Kernel;

/// Opaque device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceId(pub u64);

/// Opaque context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ContextId(pub u64);

/// Completion event of an enqueued launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event(pub u64);

/// Errors reported by a device or queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("enqueue of '{kernel}' failed: {reason}")]
    Enqueue { kernel: String, reason: String },

    #[error("unknown image {0:?}")]
    UnknownImage(ImageId),

    #[error("device lost: {0}")]
    Lost(String),
}

pub trait Device: Send + Sync {
    fn id(&self) -> DeviceId;

    fn context(&self) -> ContextId;

    fn name(&self) -> &str;

    fn vendor(&self) -> &str;

    fn compute_units(&self) -> u32;

    fn wavefront_size(&self) -> u32;

    /// Local memory per work group, in bytes.
    fn local_mem_size(&self) -> usize;

    fn has_native_double(&self) -> bool {
        true
    }

    fn is_amd(&self) -> bool {
        let vendor = self.vendor();
        vendor.contains("Advanced Micro Devices") || vendor.contains("AMD")
    }
}

/// One kernel launch.
#[derive(Debug, Clone)]
pub struct Launch {
    pub kernel: Arc<Kernel>,
    pub global: [usize; 2],
    pub local: [usize; 2],
    pub work_dim: u32,
    pub args: KernelArgs,
    pub wait_list: Vec<Event>,
}

/// In-order command queue bound to one device.
pub trait CommandQueue: Send + Sync {
    fn device(&self) -> &dyn Device;

    fn enqueue(&self, launch: Launch) -> Result<Event, DeviceError>;

    /// `(width, height)` of a scratch image.
    fn image_size(&self, image: ImageId) -> Result<(usize, usize), DeviceError> {
        Err(DeviceError::UnknownImage(image))
    }
}

/// Compiler diagnostics of a failed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLog(pub String);

/// A built program holding one kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub handle: u64,
    pub device: DeviceId,
    pub binary_size: usize,
}

/// Compiles kernel source for a device.
pub trait ProgramBuilder: Send + Sync {
    fn build(&self, source: &str, options: &str, device: &dyn Device) -> Result<Program, BuildLog>;
}

pub mod mem {
    //! In-memory devices, queues and builders.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Fixed device description.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DeviceInfo {
        pub id: DeviceId,
        pub context: ContextId,
        pub name: String,
        pub vendor: String,
        pub compute_units: u32,
        pub wavefront_size: u32,
        pub local_mem_size: usize,
        pub native_double: bool,
    }

    impl DeviceInfo {
        /// A GCN-like device with `compute_units` units.
        pub fn new(id: u64, compute_units: u32) -> Self {
            Self {
                id: DeviceId(id),
                context: ContextId(1),
                name: format!("device{id}"),
                vendor: "Advanced Micro Devices, Inc.".to_string(),
                compute_units,
                wavefront_size: 64,
                local_mem_size: 32 * 1024,
                native_double: true,
            }
        }

        pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
            self.vendor = vendor.into();
            self
        }
    }

    impl Device for DeviceInfo {
        fn id(&self) -> DeviceId {
            self.id
        }

        fn context(&self) -> ContextId {
            self.context
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn vendor(&self) -> &str {
            &self.vendor
        }

        fn compute_units(&self) -> u32 {
            self.compute_units
        }

        fn wavefront_size(&self) -> u32 {
            self.wavefront_size
        }

        fn local_mem_size(&self) -> usize {
            self.local_mem_size
        }

        fn has_native_double(&self) -> bool {
            self.native_double
        }
    }

    /// Queue recording every launch instead of running it.
    #[derive(Debug)]
    pub struct RecordingQueue {
        device: DeviceInfo,
        launches: Mutex<Vec<Launch>>,
        next_event: AtomicU64,
        images: HashMap<ImageId, (usize, usize)>,
        fail_at: Option<usize>,
    }

    impl RecordingQueue {
        pub fn new(device: DeviceInfo) -> Self {
            Self {
                device,
                launches: Mutex::new(Vec::new()),
                next_event: AtomicU64::new(1),
                images: HashMap::new(),
                fail_at: None,
            }
        }

        /// Register a scratch image of the given size.
        pub fn with_image(mut self, image: ImageId, width: usize, height: usize) -> Self {
            self.images.insert(image, (width, height));
            self
        }

        /// Fail the launch with index `n` (zero based) and every later one.
        pub fn failing_at(mut self, n: usize) -> Self {
            self.fail_at = Some(n);
            self
        }

        /// Launches accepted so far.
        pub fn launches(&self) -> Vec<Launch> {
            self.launches.lock().map(|l| l.clone()).unwrap_or_default()
        }

        pub fn launch_count(&self) -> usize {
            self.launches.lock().map(|l| l.len()).unwrap_or(0)
        }
    }

    impl CommandQueue for RecordingQueue {
        fn device(&self) -> &dyn Device {
            &self.device
        }

        fn enqueue(&self, launch: Launch) -> Result<Event, DeviceError> {
            let mut launches = self
                .launches
                .lock()
                .map_err(|_| DeviceError::Lost("queue lock poisoned".to_string()))?;
            if self.fail_at.is_some_and(|n| launches.len() >= n) {
                return Err(DeviceError::Enqueue {
                    kernel: launch.kernel.name.clone(),
                    reason: "injected failure".to_string(),
                });
            }
            launches.push(launch);
            Ok(Event(self.next_event.fetch_add(1, Ordering::SeqCst)))
        }

        fn image_size(&self, image: ImageId) -> Result<(usize, usize), DeviceError> {
            self.images
                .get(&image)
                .copied()
                .ok_or(DeviceError::UnknownImage(image))
        }
    }

    /// Builder accepting any source unless it contains a marker.
    #[derive(Debug, Default)]
    pub struct SourceBuilder {
        reject: Option<String>,
        builds: AtomicUsize,
        next_handle: AtomicU64,
    }

    impl SourceBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail every build whose source contains `marker`.
        pub fn rejecting(marker: impl Into<String>) -> Self {
            Self {
                reject: Some(marker.into()),
                ..Self::default()
            }
        }

        /// Number of builds attempted.
        pub fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }
    }

    impl ProgramBuilder for SourceBuilder {
        fn build(&self, source: &str, _options: &str, device: &dyn Device) -> Result<Program, BuildLog> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.reject.as_deref().filter(|m| source.contains(m)) {
                return Err(BuildLog(format!("error: rejected construct '{marker}'")));
            }
            Ok(Program {
                handle: self.next_handle.fetch_add(1, Ordering::SeqCst) + 1,
                device: device.id(),
                binary_size: source.len(),
            })
        }
    }
}
