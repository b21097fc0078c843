//! Cloud-init documents that install the build user and its key.
//!
//! Scaleway receives the user-data in the server creation request; libvirt
//! packs user-data and meta-data onto a `cidata` seed ISO. Scalars are
//! emitted as JSON strings, which YAML accepts verbatim, so key material and
//! user names never need YAML-specific escaping.

/// Renders `#cloud-config` user-data creating `user` with passwordless sudo
/// and `public_key` as its only authorised key.
#[must_use]
pub fn render_user_data(user: &str, public_key: &str) -> String {
    format!(
        concat!(
            "#cloud-config\n",
            "users:\n",
            "  - name: {user}\n",
            "    sudo: \"ALL=(ALL) NOPASSWD:ALL\"\n",
            "    shell: /bin/bash\n",
            "    lock_passwd: true\n",
            "    ssh_authorized_keys:\n",
            "      - {key}\n",
            "ssh_pwauth: false\n",
            "manage_etc_hosts: true\n",
        ),
        user = yaml_scalar(user),
        key = yaml_scalar(public_key.trim()),
    )
}

/// Renders NoCloud meta-data.
#[must_use]
pub fn render_meta_data(instance_id: &str, hostname: &str) -> String {
    format!(
        "instance-id: {}\nlocal-hostname: {}\n",
        yaml_scalar(instance_id),
        yaml_scalar(hostname)
    )
}

fn yaml_scalar(value: &str) -> String {
    serde_json::Value::String(value.to_owned()).to_string()
}
