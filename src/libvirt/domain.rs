//! Domain XML for the build guest and parsers for `virsh` output.

use std::net::IpAddr;

use camino::Utf8Path;

use crate::provider::InstanceStatus;

use super::sizes::GuestResources;

/// Inputs for [`render_domain_xml`].
#[derive(Clone, Copy, Debug)]
pub struct DomainSpec<'a> {
    /// Domain name.
    pub name: &'a str,
    /// Free text stored as the domain description; used to find the
    /// domain again from its credential.
    pub description: &'a str,
    /// CPU, memory and disk.
    pub resources: &'a GuestResources,
    /// Writable qcow2 disk in the work area.
    pub disk: &'a Utf8Path,
    /// `cidata` seed ISO.
    pub seed: &'a Utf8Path,
    /// libvirt network name.
    pub network: &'a str,
}

/// Renders a KVM domain with virtio disk and NIC, the seed ISO as a CD-ROM
/// and a guest agent channel for address discovery.
#[must_use]
pub fn render_domain_xml(domain: &DomainSpec<'_>) -> String {
    format!(
        r#"<domain type="kvm">
  <name>{name}</name>
  <description>{description}</description>
  <memory unit="MiB">{memory}</memory>
  <vcpu>{vcpus}</vcpu>
  <os>
    <type arch="x86_64">hvm</type>
    <boot dev="hd"/>
  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
  <cpu mode="host-passthrough"/>
  <devices>
    <disk type="file" device="disk">
      <driver name="qemu" type="qcow2"/>
      <source file="{disk}"/>
      <target dev="vda" bus="virtio"/>
    </disk>
    <disk type="file" device="cdrom">
      <driver name="qemu" type="raw"/>
      <source file="{seed}"/>
      <target dev="sda" bus="sata"/>
      <readonly/>
    </disk>
    <interface type="network">
      <source network="{network}"/>
      <model type="virtio"/>
    </interface>
    <channel type="unix">
      <target type="virtio" name="org.qemu.guest_agent.0"/>
    </channel>
    <serial type="pty"/>
    <console type="pty"/>
  </devices>
</domain>
"#,
        name = xml_escape(domain.name),
        description = xml_escape(domain.description),
        memory = domain.resources.memory_mib,
        vcpus = domain.resources.vcpus,
        disk = xml_escape(domain.disk.as_str()),
        seed = xml_escape(domain.seed.as_str()),
        network = xml_escape(domain.network),
    )
}

fn xml_escape(text: &str) -> String {
    text.chars().fold(String::with_capacity(text.len()), |mut out, ch| {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
        out
    })
}

/// Maps `virsh domstate` output onto the provider-neutral status.
#[must_use]
pub fn map_domstate(state: &str) -> InstanceStatus {
    match state.trim() {
        "running" | "idle" => InstanceStatus::Running,
        "shut off" | "paused" | "pmsuspended" => InstanceStatus::Stopped,
        "in shutdown" => InstanceStatus::Terminating,
        "crashed" => InstanceStatus::Failed,
        _ => InstanceStatus::Pending,
    }
}

/// Returns the first non-loopback IPv4 address in `virsh domifaddr`
/// output.
#[must_use]
pub fn parse_domifaddr(output: &str) -> Option<IpAddr> {
    output
        .lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let _name = columns.next()?;
            let _mac = columns.next()?;
            let protocol = columns.next()?;
            let address = columns.next()?;
            (protocol == "ipv4").then_some(address)
        })
        .filter_map(|cidr| cidr.split('/').next())
        .filter_map(|text| text.parse::<IpAddr>().ok())
        .find(|ip| !ip.is_loopback())
}

/// Returns the source of the first file-backed disk in
/// `virsh domblklist --details` output.
#[must_use]
pub fn parse_disk_source(output: &str) -> Option<&str> {
    output.lines().find_map(|line| {
        let mut columns = line.split_whitespace();
        let kind = columns.next()?;
        let device = columns.next()?;
        let _target = columns.next()?;
        let source = columns.next()?;
        (kind == "file" && device == "disk").then_some(source)
    })
}
