//! Device selection for model placement
//!
//! Probing sits behind [`DeviceProbe`] so the selection policy can be
//! exercised without real hardware.

use sentinel_core::{Accelerator, DevicePreference, ExecutionDevice};
use std::process::Command;
use tracing::{debug, info, warn};

const MIB: u64 = 1024 * 1024;

/// An accelerator visible to the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorInfo {
    pub accelerator: Accelerator,
    pub ordinal: usize,
    pub name: Option<String>,
    /// Free device memory; `None` when the driver does not report it
    pub free_memory_bytes: Option<u64>,
}

/// Reports which accelerators are usable
pub trait DeviceProbe: Send + Sync {
    fn accelerators(&self) -> Vec<AcceleratorInfo>;
}

/// Probe backed by candle's build-time support and the NVIDIA driver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDeviceProbe;

impl DeviceProbe for SystemDeviceProbe {
    fn accelerators(&self) -> Vec<AcceleratorInfo> {
        let mut found = Vec::new();

        if candle_core::utils::cuda_is_available() {
            let reported = query_nvidia_smi();
            if reported.is_empty() {
                found.push(AcceleratorInfo {
                    accelerator: Accelerator::Cuda,
                    ordinal: 0,
                    name: None,
                    free_memory_bytes: None,
                });
            } else {
                found.extend(reported);
            }
        }

        if candle_core::utils::metal_is_available() {
            found.push(AcceleratorInfo {
                accelerator: Accelerator::Metal,
                ordinal: 0,
                name: None,
                free_memory_bytes: None,
            });
        }

        debug!("Probed {} accelerator(s)", found.len());
        found
    }
}

/// A fixed set of accelerators
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceProbe {
    accelerators: Vec<AcceleratorInfo>,
}

impl StaticDeviceProbe {
    /// Probe reporting no accelerators
    pub fn none() -> Self {
        Self::default()
    }

    /// Probe reporting the given accelerators
    pub fn new(accelerators: Vec<AcceleratorInfo>) -> Self {
        Self { accelerators }
    }

    /// Probe reporting one CUDA device with the given free memory
    pub fn cuda_with_free_memory(free_memory_bytes: u64) -> Self {
        Self::new(vec![AcceleratorInfo {
            accelerator: Accelerator::Cuda,
            ordinal: 0,
            name: None,
            free_memory_bytes: Some(free_memory_bytes),
        }])
    }
}

impl DeviceProbe for StaticDeviceProbe {
    fn accelerators(&self) -> Vec<AcceleratorInfo> {
        self.accelerators.clone()
    }
}

/// Pick the execution device for a preference and memory floor.
///
/// An explicit `cpu` preference is never degraded. Any other preference that
/// ends up on CPU carries the reason as a degraded-mode note.
pub fn select_device(
    preference: DevicePreference,
    probe: &dyn DeviceProbe,
    min_free_memory_bytes: u64,
) -> ExecutionDevice {
    let wanted: &[Accelerator] = match preference {
        DevicePreference::Cpu => return ExecutionDevice::cpu(),
        DevicePreference::Auto => &[Accelerator::Cuda, Accelerator::Metal],
        DevicePreference::Cuda => &[Accelerator::Cuda],
        DevicePreference::Metal => &[Accelerator::Metal],
    };

    let candidates: Vec<AcceleratorInfo> = probe
        .accelerators()
        .into_iter()
        .filter(|info| wanted.contains(&info.accelerator))
        .collect();

    if candidates.is_empty() {
        let reason = "no accelerator available".to_string();
        warn!("Falling back to CPU: {}", reason);
        return ExecutionDevice::cpu_fallback(reason);
    }

    let mut shortfall = Vec::new();
    for info in &candidates {
        match info.free_memory_bytes {
            Some(free) if free < min_free_memory_bytes => {
                shortfall.push(format!(
                    "{}:{} has {} MiB free, below the {} MiB minimum",
                    info.accelerator,
                    info.ordinal,
                    free / MIB,
                    min_free_memory_bytes / MIB
                ));
            }
            free => {
                if free.is_none() {
                    debug!(
                        "{}:{} does not report free memory, accepting it",
                        info.accelerator, info.ordinal
                    );
                }
                info!(
                    "Selected {}:{}{}",
                    info.accelerator,
                    info.ordinal,
                    info.name
                        .as_deref()
                        .map(|n| format!(" ({})", n))
                        .unwrap_or_default()
                );
                return ExecutionDevice::Gpu {
                    accelerator: info.accelerator,
                    ordinal: info.ordinal,
                };
            }
        }
    }

    let reason = shortfall.join("; ");
    warn!("Falling back to CPU: {}", reason);
    ExecutionDevice::cpu_fallback(reason)
}

fn query_nvidia_smi() -> Vec<AcceleratorInfo> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,name,memory.free",
            "--format=csv,noheader,nounits",
        ])
        .output();

    match output {
        Ok(out) if out.status.success() => {
            parse_nvidia_smi(&String::from_utf8_lossy(&out.stdout))
        }
        Ok(out) => {
            debug!("nvidia-smi exited with {}", out.status);
            Vec::new()
        }
        Err(e) => {
            debug!("nvidia-smi unavailable: {}", e);
            Vec::new()
        }
    }
}

/// Parse `index, name, memory.free` rows (memory in MiB)
fn parse_nvidia_smi(stdout: &str) -> Vec<AcceleratorInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(',').map(str::trim);
            let ordinal = fields.next()?.parse().ok()?;
            let name = fields.next().map(str::to_string);
            let free_mib: u64 = fields.next()?.parse().ok()?;
            Some(AcceleratorInfo {
                accelerator: Accelerator::Cuda,
                ordinal,
                name,
                free_memory_bytes: Some(free_mib * MIB),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * MIB;

    #[test]
    fn test_explicit_cpu_is_not_degraded() {
        let probe = StaticDeviceProbe::cuda_with_free_memory(8 * GIB);
        let device = select_device(DevicePreference::Cpu, &probe, 2 * GIB);
        assert_eq!(device, ExecutionDevice::cpu());
        assert!(!device.is_degraded());
    }

    #[test]
    fn test_auto_prefers_gpu_with_headroom() {
        let probe = StaticDeviceProbe::cuda_with_free_memory(8 * GIB);
        let device = select_device(DevicePreference::Auto, &probe, 2 * GIB);
        assert_eq!(
            device,
            ExecutionDevice::Gpu {
                accelerator: Accelerator::Cuda,
                ordinal: 0
            }
        );
    }

    #[test]
    fn test_memory_floor_forces_degraded_cpu() {
        let probe = StaticDeviceProbe::cuda_with_free_memory(GIB);
        let device = select_device(DevicePreference::Auto, &probe, 2 * GIB);
        assert!(device.is_degraded());
        if let ExecutionDevice::Cpu {
            fallback_reason: Some(reason),
        } = device
        {
            assert!(reason.contains("1024 MiB free"));
        }
    }

    #[test]
    fn test_no_accelerator_is_degraded() {
        let device = select_device(DevicePreference::Auto, &StaticDeviceProbe::none(), 0);
        assert!(device.is_degraded());
    }

    #[test]
    fn test_preference_filters_family() {
        let probe = StaticDeviceProbe::cuda_with_free_memory(8 * GIB);
        assert!(select_device(DevicePreference::Metal, &probe, 0).is_degraded());
    }

    #[test]
    fn test_unknown_memory_is_accepted() {
        let probe = StaticDeviceProbe::new(vec![AcceleratorInfo {
            accelerator: Accelerator::Metal,
            ordinal: 0,
            name: None,
            free_memory_bytes: None,
        }]);
        let device = select_device(DevicePreference::Auto, &probe, 2 * GIB);
        assert!(!device.is_degraded());
    }

    #[test]
    fn test_second_gpu_used_when_first_is_full() {
        let probe = StaticDeviceProbe::new(vec![
            AcceleratorInfo {
                accelerator: Accelerator::Cuda,
                ordinal: 0,
                name: None,
                free_memory_bytes: Some(GIB / 2),
            },
            AcceleratorInfo {
                accelerator: Accelerator::Cuda,
                ordinal: 1,
                name: None,
                free_memory_bytes: Some(6 * GIB),
            },
        ]);
        let device = select_device(DevicePreference::Cuda, &probe, 2 * GIB);
        assert_eq!(
            device,
            ExecutionDevice::Gpu {
                accelerator: Accelerator::Cuda,
                ordinal: 1
            }
        );
    }

    #[test]
    fn test_parse_nvidia_smi() {
        let rows = parse_nvidia_smi("0, NVIDIA GeForce RTX 3060, 11800\n1, Tesla T4, 900\nbogus\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name.as_deref(), Some("NVIDIA GeForce RTX 3060"));
        assert_eq!(rows[0].free_memory_bytes, Some(11800 * MIB));
        assert_eq!(rows[1].ordinal, 1);
    }
}
