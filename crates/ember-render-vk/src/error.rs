// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_core::ArenaError;
use ember_render::{AssetError, ScheduleError};
use thiserror::Error;

pub type Result<T, E = VkError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum VkError {
    #[error("{what}: out of memory ({result:?})")]
    OutOfMemory {
        what: &'static str,
        result: vk::Result,
    },
    #[error("scratch arena: {0}")]
    Arena(#[from] ArenaError),
    #[error("descriptor pool exhausted ({max} models)")]
    DescriptorPoolExhausted { max: u32 },
    #[error("device lost during {call} ({result:?})")]
    DeviceLost {
        call: &'static str,
        result: vk::Result,
    },
    #[error("surface out of date")]
    SurfaceOutOfDate,
    #[error("asset {path}: {source}")]
    Asset {
        path: String,
        #[source]
        source: AssetError,
    },
    #[error("no adapter with a graphics queue that can present to the surface")]
    NoSuitableAdapter,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("frame call out of order: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("{call} failed: {result:?}")]
    Api {
        call: &'static str,
        result: vk::Result,
    },
    #[error("window handle: {0}")]
    Window(#[from] raw_window_handle::HandleError),
    #[error("gpu allocation: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),
    #[error("shader {path}: {source}")]
    Shader {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown {0} handle")]
    UnknownHandle(&'static str),
}

/// Coarse classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ResourceExhaustion,
    DeviceLoss,
    AssetFormat,
    PresentationState,
    Setup,
    Usage,
}

impl VkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VkError::OutOfMemory { .. }
            | VkError::Arena(_)
            | VkError::DescriptorPoolExhausted { .. } => ErrorKind::ResourceExhaustion,
            VkError::Allocation(gpu_allocator::AllocationError::OutOfMemory) => {
                ErrorKind::ResourceExhaustion
            }
            VkError::DeviceLost { .. } => ErrorKind::DeviceLoss,
            VkError::Asset { .. } | VkError::Shader { .. } => ErrorKind::AssetFormat,
            VkError::SurfaceOutOfDate => ErrorKind::PresentationState,
            VkError::Schedule(_) | VkError::UnknownHandle(_) => ErrorKind::Usage,
            VkError::NoSuitableAdapter
            | VkError::Unsupported(_)
            | VkError::Loading(_)
            | VkError::Api { .. }
            | VkError::Window(_)
            | VkError::Allocation(_) => ErrorKind::Setup,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::PresentationState
    }

    pub(crate) fn asset(path: &std::path::Path, source: AssetError) -> Self {
        VkError::Asset {
            path: path.display().to_string(),
            source,
        }
    }

    fn from_vk(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_FRAGMENTED_POOL => VkError::OutOfMemory { what: call, result },
            vk::Result::ERROR_DEVICE_LOST | vk::Result::TIMEOUT => {
                VkError::DeviceLost { call, result }
            }
            vk::Result::ERROR_OUT_OF_DATE_KHR => VkError::SurfaceOutOfDate,
            _ => VkError::Api { call, result },
        }
    }
}

/// Attaches the failing call's name to a raw `vk::Result`.
pub trait VkResultExt<T> {
    fn during(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn during(self, call: &'static str) -> Result<T> {
        self.map_err(|r| VkError::from_vk(call, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(r: vk::Result) -> ErrorKind {
        Err::<(), _>(r).during("test").unwrap_err().kind()
    }

    #[test]
    fn memory_codes_are_exhaustion() {
        assert_eq!(
            classify(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            ErrorKind::ResourceExhaustion
        );
        assert_eq!(
            classify(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            ErrorKind::ResourceExhaustion
        );
        assert_eq!(
            classify(vk::Result::ERROR_OUT_OF_POOL_MEMORY),
            ErrorKind::ResourceExhaustion
        );
    }

    #[test]
    fn device_loss_and_timeout() {
        assert_eq!(classify(vk::Result::ERROR_DEVICE_LOST), ErrorKind::DeviceLoss);
        assert_eq!(classify(vk::Result::TIMEOUT), ErrorKind::DeviceLoss);
    }

    #[test]
    fn out_of_date_is_recoverable() {
        let err = Err::<(), _>(vk::Result::ERROR_OUT_OF_DATE_KHR)
            .during("vkQueuePresentKHR")
            .unwrap_err();
        assert!(matches!(err, VkError::SurfaceOutOfDate));
        assert!(!err.is_fatal());
    }

    #[test]
    fn other_codes_keep_call_name() {
        let err = Err::<(), _>(vk::Result::ERROR_INITIALIZATION_FAILED)
            .during("vkCreateInstance")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Setup);
        assert!(err.to_string().contains("vkCreateInstance"));
    }

    #[test]
    fn library_errors_classify() {
        let asset = VkError::asset(std::path::Path::new("a.dds"), AssetError::BadMagic);
        assert_eq!(asset.kind(), ErrorKind::AssetFormat);
        assert!(asset.to_string().contains("a.dds"));

        let arena: VkError = ArenaError::Exhausted {
            requested: 16,
            remaining: 0,
            capacity: 4096,
        }
        .into();
        assert_eq!(arena.kind(), ErrorKind::ResourceExhaustion);

        let sched: VkError = ScheduleError::RenderingNotActive.into();
        assert_eq!(sched.kind(), ErrorKind::Usage);
        assert!(sched.is_fatal());
    }
}
