/// Wire types for the cloud provider's server/queue API.
use serde::{Deserialize, Serialize};

/// A server as returned by `/service/server/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub networks: Vec<ServerNetwork>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerNetwork {
    pub network: String,
    #[serde(default)]
    pub ips: Vec<String>,
}

impl ServerInfo {
    /// The first network beginning with `wan-` is public; any other
    /// network supplies the private IP. Both are required.
    pub fn public_private_ips(&self) -> crate::error::Result<(String, String)> {
        let mut public = None;
        let mut private = None;
        for net in &self.networks {
            let ip = net.ips.first().cloned();
            if net.network.starts_with("wan-") {
                public = public.or(ip);
            } else {
                private = private.or(ip);
            }
        }
        match (public, private) {
            (Some(pub_ip), Some(priv_ip)) => Ok((pub_ip, priv_ip)),
            _ => Err(crate::error::ControlPlaneError::CloudApi(format!(
                "server {} is missing a public or private network IP",
                self.name
            ))),
        }
    }
}

/// A row from `/svc/queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRow {
    pub id: String,
    #[serde(rename = "commandInfo")]
    pub command_info: String,
    #[serde(rename = "serviceName")]
    pub service_name: String,
}

/// Parameters for a server-create request, already merged with pool/cluster
/// defaults.
#[derive(Debug, Clone)]
pub struct CreateServerSpec {
    pub name: String,
    pub password: String,
    pub ssh_key: String,
    pub datacenter: String,
    pub private_network_name: String,
    pub node_config: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub password: String,
    #[serde(rename = "passwordValidate")]
    pub password_validate: String,
    #[serde(rename = "ssh-key")]
    pub ssh_key: String,
    pub datacenter: String,
    pub image: String,
    pub cpu: String,
    pub ram: String,
    pub disk: String,
    pub dailybackup: String,
    pub managed: String,
    pub network: String,
    pub quantity: u32,
    pub billingcycle: String,
    pub monthlypackage: String,
    pub poweronaftercreate: String,
}
