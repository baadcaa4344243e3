use candle_core::{DType, Device};
use tracing::{info, warn};

use crate::error::CoreResult;

/// Selects the compute device for inference.
///
/// With the `cuda` feature and `prefer_gpu`, CUDA device `cuda_device_id` is
/// tried first, then Metal with the `metal` feature. Any failure falls back
/// to the CPU.
pub fn select_device(prefer_gpu: bool, #[allow(unused_variables)] cuda_device_id: usize) -> CoreResult<Device> {
    #[cfg(feature = "cuda")]
    if prefer_gpu {
        match Device::new_cuda(cuda_device_id) {
            Ok(dev) => {
                info!(cuda_device_id, "Using CUDA device");
                return Ok(dev);
            }
            Err(e) => warn!(error = %e, "CUDA unavailable, falling back to CPU"),
        }
    }

    #[cfg(feature = "metal")]
    if prefer_gpu {
        match Device::new_metal(0) {
            Ok(dev) => {
                info!("Using Metal device");
                return Ok(dev);
            }
            Err(e) => warn!(error = %e, "Metal unavailable, falling back to CPU"),
        }
    }

    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    if prefer_gpu {
        warn!("GPU requested but psyllm was built without the `cuda` or `metal` feature");
    }
    info!("Using CPU device");
    Ok(Device::Cpu)
}

/// Weight dtype for a device: bf16 on accelerators, f32 on the CPU.
pub fn dtype_for(device: &Device) -> DType {
    if device.is_cpu() {
        DType::F32
    } else {
        DType::BF16
    }
}

/// Human-readable device label for logs.
pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "CPU",
        Device::Cuda(_) => "CUDA",
        Device::Metal(_) => "Metal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_gpu_returns_cpu() {
        let device = select_device(false, 0).unwrap();
        assert!(matches!(device, Device::Cpu));
    }

    #[test]
    fn gpu_request_without_features_falls_back() {
        #[cfg(not(any(feature = "cuda", feature = "metal")))]
        {
            let device = select_device(true, 0).unwrap();
            assert!(matches!(device, Device::Cpu));
        }
    }

    #[test]
    fn cpu_uses_f32() {
        assert_eq!(dtype_for(&Device::Cpu), DType::F32);
        assert_eq!(device_name(&Device::Cpu), "CPU");
    }
}
