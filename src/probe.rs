//! Host port availability probe
//!
//! Tries to bind every published host port the way the container engine
//! would. The result is informational: a port can be taken between the
//! probe and `up`.

use crate::compose::Project;
use crate::container::{PortBinding, Protocol};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinSet;

/// Availability of a single host port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "reason")]
pub enum PortState {
    Free,
    InUse,
    /// Bind failed for another reason (permissions, unknown address)
    Unavailable(String),
}

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortState::Free => write!(f, "free"),
            PortState::InUse => write!(f, "in use"),
            PortState::Unavailable(reason) => write!(f, "unavailable ({})", reason),
        }
    }
}

/// Probe result for one service port
#[derive(Debug, Clone, Serialize)]
pub struct PortStatus {
    pub service: String,
    pub binding: PortBinding,
    pub state: PortState,
}

/// Probe every published host port in the project, ordered by port
pub async fn probe_ports(project: &Project) -> Vec<PortStatus> {
    let mut tasks = JoinSet::new();
    for (service, binding) in project.host_ports() {
        let service = service.name.clone();
        let binding = binding.clone();
        tasks.spawn(async move {
            let state = probe_binding(&binding).await;
            PortStatus {
                service,
                binding,
                state,
            }
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(status) => results.push(status),
            Err(e) => tracing::warn!("Port probe task failed: {}", e),
        }
    }
    results.sort_by_key(|s| (s.binding.published, s.binding.protocol, s.service.clone()));
    results
}

/// Try to bind a single published port
pub async fn probe_binding(binding: &PortBinding) -> PortState {
    let Some(port) = binding.published else {
        return PortState::Free;
    };
    let ip = binding
        .host_ip
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let addr = SocketAddr::new(ip, port);

    let outcome = match binding.protocol {
        Protocol::Tcp => TcpListener::bind(addr).await.map(drop),
        Protocol::Udp => UdpSocket::bind(addr).await.map(drop),
    };

    match outcome {
        Ok(()) => PortState::Free,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            tracing::debug!("{} is in use", addr);
            PortState::InUse
        }
        Err(e) => PortState::Unavailable(e.to_string()),
    }
}
