//! Backend abstraction - Multi-backend support
//!
//! Supports both CUDA (GPU) and NdArray (CPU) backends. The device is chosen
//! once at startup; a missing accelerator falls back to the CPU backend.

use burn::backend::{Autodiff, NdArray};

/// CPU backend used for fallback and for tests
pub type CpuBackend = NdArray;

/// Autodiff CPU backend
pub type CpuTrainingBackend = Autodiff<CpuBackend>;

#[cfg(feature = "cuda")]
pub type GpuBackend = burn_cuda::Cuda;

#[cfg(feature = "cuda")]
pub type GpuTrainingBackend = Autodiff<GpuBackend>;

/// Device selected for a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// CPU (NdArray) backend
    Cpu,
    /// CUDA GPU with the given ordinal
    Cuda(usize),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "NdArray (CPU)"),
            Device::Cuda(id) => write!(f, "CUDA (GPU:{})", id),
        }
    }
}

/// Select the best available device.
///
/// CUDA is only considered when the crate is built with the `cuda` feature.
pub fn select_device() -> Device {
    if cfg!(feature = "cuda") && has_nvidia_gpu() {
        tracing::info!("NVIDIA GPU detected - training on CUDA");
        return Device::Cuda(0);
    }

    if cfg!(feature = "cuda") {
        tracing::warn!("CUDA support compiled in but no GPU detected - falling back to CPU");
    } else {
        tracing::info!("No accelerator backend compiled in - training on CPU");
    }
    Device::Cpu
}

/// Check for NVIDIA GPU (CUDA)
fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
            || std::process::Command::new("nvidia-smi")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("nvidia-smi.exe")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_fallback_without_cuda_feature() {
        if !cfg!(feature = "cuda") {
            assert_eq!(select_device(), Device::Cpu);
        }
    }

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "NdArray (CPU)");
        assert_eq!(Device::Cuda(1).to_string(), "CUDA (GPU:1)");
    }
}
