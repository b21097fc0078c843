//! Newtypes and wire types for Scaleway lifecycle values.

use std::ops::Deref;

use scaleway_rs::ScalewayImage;
use serde::{Deserialize, Serialize};

macro_rules! newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub(crate) struct $name(String);

        impl $name {
            pub(crate) const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }
    };
}

newtype!(InstanceId);
newtype!(Zone);
newtype!(InstanceState);
newtype!(Action);

/// Tag placed on every build instance.
pub(crate) const INSTANCE_TAG: &str = "ofen";

/// Tag linking an instance to the credential it was launched with.
pub(crate) fn credential_tag(credential: &str) -> String {
    format!("ofen-key:{credential}")
}

#[derive(Serialize)]
pub(crate) struct CreateSshKeyRequest<'a> {
    pub(crate) name: &'a str,
    pub(crate) public_key: &'a str,
    pub(crate) project_id: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct SshKeyResponse {
    pub(crate) id: String,
    pub(crate) name: String,
}

#[derive(Serialize)]
pub(crate) struct CreateSecurityGroupRequest<'a> {
    pub(crate) name: &'a str,
    pub(crate) project: &'a str,
    pub(crate) description: &'a str,
    pub(crate) stateful: bool,
    pub(crate) inbound_default_policy: &'a str,
    pub(crate) outbound_default_policy: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct SecurityGroupEnvelope {
    pub(crate) security_group: SecurityGroupBody,
}

#[derive(Deserialize)]
pub(crate) struct SecurityGroupBody {
    pub(crate) id: String,
    pub(crate) name: String,
}

#[derive(Serialize)]
pub(crate) struct SecurityGroupRuleRequest<'a> {
    pub(crate) action: &'a str,
    pub(crate) direction: &'a str,
    pub(crate) protocol: &'a str,
    pub(crate) ip_range: &'a str,
    pub(crate) dest_port_from: u16,
}

#[derive(Serialize)]
pub(crate) struct CreateServerRequest {
    pub(crate) name: String,
    pub(crate) commercial_type: String,
    pub(crate) image: String,
    pub(crate) project: String,
    pub(crate) routed_ip_enabled: bool,
    pub(crate) dynamic_ip_required: bool,
    pub(crate) tags: Vec<String>,
    pub(crate) security_group: String,
    pub(crate) stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) volumes: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub(crate) struct ServerEnvelope {
    pub(crate) server: ServerBody,
}

#[derive(Deserialize)]
pub(crate) struct ServerList {
    pub(crate) servers: Vec<ServerBody>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ServerBody {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) allowed_actions: Vec<String>,
    #[serde(default)]
    pub(crate) public_ip: Option<PublicIp>,
    #[serde(default)]
    pub(crate) private_ip: Option<String>,
    #[serde(default)]
    pub(crate) zone: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct PublicIp {
    pub(crate) address: String,
}

#[derive(Serialize)]
pub(crate) struct ServerActionRequest<'a> {
    pub(crate) action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<&'a str>,
}

#[derive(Deserialize)]
pub(crate) struct TaskEnvelope {
    pub(crate) task: TaskBody,
}

#[derive(Deserialize)]
pub(crate) struct TaskBody {
    #[serde(default)]
    pub(crate) href_result: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct UpdateImageRequest<'a> {
    pub(crate) tags: &'a [String],
}

#[derive(Deserialize)]
pub(crate) struct ImageEnvelope {
    pub(crate) image: ImageBody,
}

#[derive(Deserialize)]
pub(crate) struct ImageBody {
    pub(crate) state: String,
}

#[derive(Deserialize)]
pub(crate) struct FullImageEnvelope {
    pub(crate) image: ScalewayImage,
}
