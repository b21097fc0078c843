//! Size classes for local guests.

use crate::spec::BuildSpec;

use super::LibvirtError;

/// Resources given to the build guest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GuestResources {
    /// Virtual CPUs.
    pub vcpus: u32,
    /// Memory in MiB.
    pub memory_mib: u32,
    /// Disk size passed to `qemu-img resize` (`20G`).
    pub disk: String,
}

const SIZES: &[(&str, u32, u32, &str)] = &[
    ("small", 1, 1024, "10G"),
    ("medium", 2, 4096, "20G"),
    ("large", 4, 8192, "40G"),
    ("xlarge", 8, 16384, "80G"),
];

/// Resolves the spec's size class, applying `vcpus`, `memory` and
/// `disk_size` overrides.
///
/// # Errors
///
/// Returns [`LibvirtError::UnknownInstanceType`] for unknown classes and
/// [`LibvirtError::Spec`] for zero or malformed overrides.
pub fn resolve_resources(spec: &BuildSpec) -> Result<GuestResources, LibvirtError> {
    let wanted = spec.instance_type.trim().to_ascii_lowercase();
    let &(_, vcpus, memory_mib, disk) = SIZES
        .iter()
        .find(|(name, ..)| *name == wanted)
        .ok_or_else(|| LibvirtError::UnknownInstanceType(spec.instance_type.clone()))?;

    let resources = GuestResources {
        vcpus: spec.vcpus.unwrap_or(vcpus),
        memory_mib: spec.memory.unwrap_or(memory_mib),
        disk: spec.disk_size.clone().unwrap_or_else(|| disk.to_owned()),
    };
    if resources.vcpus == 0 || resources.memory_mib == 0 {
        return Err(LibvirtError::Spec(String::from(
            "vcpus and memory must be greater than zero",
        )));
    }
    if !is_disk_size(&resources.disk) {
        return Err(LibvirtError::Spec(format!(
            "disk_size `{}` must be a number followed by K, M, G or T",
            resources.disk
        )));
    }
    Ok(resources)
}

fn is_disk_size(text: &str) -> bool {
    let Some(digits) = text.strip_suffix(['K', 'M', 'G', 'T']) else {
        return false;
    };
    !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit())
}
