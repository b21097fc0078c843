//! Instance lifecycle helpers for the Scaleway provider.

use std::net::IpAddr;
use std::str::FromStr;

use crate::provider::{InstanceAddresses, InstanceStatus};
use crate::scaleway::types::{Action, InstanceId, InstanceState, ServerBody};

mod create;
mod image;
mod wait;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSnapshot {
    pub(crate) id: InstanceId,
    pub(crate) state: InstanceState,
    pub(crate) allowed_actions: Vec<Action>,
    pub(crate) public_ip: Option<String>,
    pub(crate) private_ip: Option<String>,
}

impl From<ServerBody> for InstanceSnapshot {
    fn from(server: ServerBody) -> Self {
        Self {
            id: server.id.into(),
            state: server.state.into(),
            allowed_actions: server
                .allowed_actions
                .into_iter()
                .map(Action::from)
                .collect(),
            public_ip: server.public_ip.map(|ip| ip.address),
            private_ip: server.private_ip,
        }
    }
}

impl InstanceSnapshot {
    pub(crate) fn status(&self) -> InstanceStatus {
        map_state(self.state.as_str())
    }

    pub(crate) fn addresses(&self) -> InstanceAddresses {
        let parse = |raw: Option<&String>| raw.and_then(|ip| IpAddr::from_str(ip).ok());
        InstanceAddresses {
            public: parse(self.public_ip.as_ref()),
            private: parse(self.private_ip.as_ref()),
            lease: None,
        }
    }

    pub(crate) fn allows(&self, action: &str) -> bool {
        self.allowed_actions
            .iter()
            .any(|allowed| allowed.as_str() == action)
    }
}

pub(crate) fn map_state(state: &str) -> InstanceStatus {
    match state {
        "running" => InstanceStatus::Running,
        "stopped" | "stopped in place" => InstanceStatus::Stopped,
        "stopping" => InstanceStatus::Terminating,
        "locked" => InstanceStatus::Failed,
        _ => InstanceStatus::Pending,
    }
}
