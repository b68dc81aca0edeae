/// Declarative cluster configuration: parsing, validation, typed accessors.
use crate::error::ControlPlaneError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const CONTROLPLANE: &str = "controlplane";

/// Top-level cluster configuration, as submitted by a caller.
///
/// `Load`/`Export` round-trip this structure verbatim, including resolved
/// credentials, so that a worker can deserialize a complete, self-contained
/// payload without consulting any other state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cnf {
    pub cluster: ClusterSection,
    #[serde(default, rename = "default-node-config")]
    pub default_node_config: serde_json::Value,
    #[serde(default, rename = "default-rke2-server-config")]
    pub default_rke2_server_config: serde_json::Value,
    #[serde(default, rename = "default-rke2-agent-config")]
    pub default_rke2_agent_config: serde_json::Value,
    #[serde(rename = "node-pools", default)]
    node_pools_raw: BTreeMap<String, CnfNodePool>,

    /// Resolved provider credentials, carried inside the document so a
    /// worker deserializing this config never needs a side channel.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub creds: Option<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    pub name: String,
    pub datacenter: String,
    #[serde(rename = "ssh-key")]
    pub ssh_key: SshKeySection,
    #[serde(rename = "private-network")]
    pub private_network: PrivateNetworkSection,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(rename = "controlplane-server-name", default)]
    pub controlplane_server_name: Option<String>,
    #[serde(rename = "allow-high-availability", default)]
    pub allow_high_availability: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeySection {
    pub private: String,
    pub public: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateNetworkSection {
    pub name: String,
}

/// `nodes` accepts either an integer count or an explicit list in the
/// source document; `CnfNodePool::node_numbers` always returns the
/// normalized, deduplicated, sorted form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodesSpec {
    Count(u32),
    List(Vec<u32>),
}

impl Default for NodesSpec {
    fn default() -> Self {
        NodesSpec::Count(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnfNodePool {
    #[serde(default)]
    pub nodes: NodesSpec,
    #[serde(rename = "node-config", default)]
    pub node_config: serde_json::Value,
    #[serde(rename = "rke2-config", default)]
    pub rke2_config: serde_json::Value,
}

impl CnfNodePool {
    /// Normalized, sorted, deduplicated node numbers for this pool.
    pub fn node_numbers(&self) -> Vec<u32> {
        let mut numbers = match &self.nodes {
            NodesSpec::Count(n) => (1..=*n).collect::<Vec<_>>(),
            NodesSpec::List(list) => list.clone(),
        };
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }

    pub fn is_server(&self, name: &str) -> bool {
        name == CONTROLPLANE
    }

    /// Merge this pool's node-config over the cluster default.
    pub fn merged_node_config(&self, default: &serde_json::Value) -> serde_json::Value {
        merge_json(default, &self.node_config)
    }

    /// Merge this pool's rke2-config over the appropriate cluster default.
    pub fn merged_rke2_config(&self, name: &str, cnf: &Cnf) -> serde_json::Value {
        let default = if self.is_server(name) {
            &cnf.default_rke2_server_config
        } else {
            &cnf.default_rke2_agent_config
        };
        merge_json(default, &self.rke2_config)
    }
}

/// Shallow object merge: keys in `overlay` win; non-object values are not
/// recursively merged, matching the original's dict `{**default, **override}`.
pub fn merge_json(default: &serde_json::Value, overlay: &serde_json::Value) -> serde_json::Value {
    match (default, overlay) {
        (serde_json::Value::Object(d), serde_json::Value::Object(o)) => {
            let mut merged = d.clone();
            for (k, v) in o {
                merged.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(merged)
        }
        (serde_json::Value::Null, o) => o.clone(),
        (d, serde_json::Value::Null) => d.clone(),
        (_, o) => o.clone(),
    }
}

impl Cnf {
    /// Parse a config from a mapping-shaped source: a path to `.json` or
    /// `.yaml`/`.yml`, or else literal YAML text (which also accepts plain
    /// JSON, since JSON is a YAML subset).
    pub fn load(source: &str) -> Result<Self, ControlPlaneError> {
        let mut cnf = Self::parse_source(source)?;
        cnf.synthesize_default_controlplane_pool();
        cnf.resolve_ssh_key_paths()?;
        cnf.validate()?;
        Ok(cnf)
    }

    /// Load a config submitted without embedded credentials, attaching the
    /// caller's `(AuthClientId, AuthSecret)` (typically HTTP headers) before
    /// validating — the HTTP façade's entry point.
    pub fn load_with_creds(source: &str, creds: (String, String)) -> Result<Self, ControlPlaneError> {
        let mut cnf = Self::parse_source(source)?;
        cnf.synthesize_default_controlplane_pool();
        cnf.resolve_ssh_key_paths()?;
        cnf.creds = Some(creds);
        cnf.validate()?;
        Ok(cnf)
    }

    fn parse_source(source: &str) -> Result<Self, ControlPlaneError> {
        let expanded = shellexpand_home(source);
        let path = Path::new(&expanded);
        if path.is_file() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => serde_json::from_str(&content)
                    .map_err(|e| ControlPlaneError::Config(format!("Invalid JSON file: {e}"))),
                Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                    .map_err(|e| ControlPlaneError::Config(format!("Invalid YAML file: {e}"))),
                _ => Err(ControlPlaneError::Config(format!(
                    "Unsupported file format: {source}"
                ))),
            }
        } else {
            serde_yaml::from_str(source)
                .map_err(|e| ControlPlaneError::Config(format!("Invalid config document: {e}")))
        }
    }

    fn synthesize_default_controlplane_pool(&mut self) {
        self.node_pools_raw
            .entry(CONTROLPLANE.to_string())
            .or_insert_with(|| CnfNodePool {
                nodes: NodesSpec::Count(1),
                node_config: serde_json::Value::Null,
                rke2_config: serde_json::Value::Null,
            });
    }

    /// Resolve `ssh-key.{private,public}` from a path to literal content,
    /// exactly once, at load time.
    fn resolve_ssh_key_paths(&mut self) -> Result<(), ControlPlaneError> {
        self.cluster.ssh_key.private = resolve_maybe_path(&self.cluster.ssh_key.private)?;
        self.cluster.ssh_key.public = resolve_maybe_path(&self.cluster.ssh_key.public)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ControlPlaneError> {
        if self.cluster.name.is_empty() {
            return Err(ControlPlaneError::Config("cluster.name is required".into()));
        }
        if self.cluster.datacenter.is_empty() {
            return Err(ControlPlaneError::Config(
                "cluster.datacenter is required".into(),
            ));
        }
        if self.cluster.ssh_key.private.is_empty() || self.cluster.ssh_key.public.is_empty() {
            return Err(ControlPlaneError::Config(
                "cluster.ssh-key.private and cluster.ssh-key.public are required".into(),
            ));
        }
        if self.cluster.private_network.name.is_empty() {
            return Err(ControlPlaneError::Config(
                "cluster.private-network.name is required".into(),
            ));
        }
        for (name, pool) in &self.node_pools_raw {
            self.validate_pool(name, pool)?;
        }
        if self.creds.is_none() {
            return Err(ControlPlaneError::Auth(
                "AuthClientId and AuthSecret are required".into(),
            ));
        }
        Ok(())
    }

    fn validate_pool(&self, name: &str, pool: &CnfNodePool) -> Result<(), ControlPlaneError> {
        if pool.node_numbers().is_empty() {
            return Err(ControlPlaneError::Config(format!(
                "node-pools.{name}.nodes is required"
            )));
        }
        if name == CONTROLPLANE
            && !self.cluster.allow_high_availability
            && pool.node_numbers().len() != 1
        {
            return Err(ControlPlaneError::Config(format!(
                "node-pools.{name}.nodes must be 1 when high availability is disabled"
            )));
        }
        Ok(())
    }

    /// All node pools, `controlplane` guaranteed present.
    pub fn node_pools(&self) -> &BTreeMap<String, CnfNodePool> {
        &self.node_pools_raw
    }

    pub fn node_pool(&self, name: &str) -> Option<&CnfNodePool> {
        self.node_pools_raw.get(name)
    }

    pub fn non_controlplane_pool_names(&self) -> Vec<String> {
        self.node_pools_raw
            .keys()
            .filter(|n| n.as_str() != CONTROLPLANE)
            .cloned()
            .collect()
    }

    /// Round-trippable serialization, including embedded credentials.
    pub fn export(&self) -> Result<String, ControlPlaneError> {
        serde_json::to_string(self).map_err(|_| ControlPlaneError::Opaque)
    }
}

fn shellexpand_home(source: &str) -> String {
    if let Some(rest) = source.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}{rest}");
        }
    }
    source.to_string()
}

fn resolve_maybe_path(value: &str) -> Result<String, ControlPlaneError> {
    let expanded = shellexpand_home(value);
    let path = Path::new(&expanded);
    if path.is_file() {
        Ok(std::fs::read_to_string(path)?)
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
cluster:
  name: c
  datacenter: d
  ssh-key:
    private: k
    public: p
  private-network:
    name: n
"#;

    fn load_with_creds(src: &str) -> Cnf {
        let mut cnf = Cnf::parse_source(src).unwrap();
        cnf.synthesize_default_controlplane_pool();
        cnf.resolve_ssh_key_paths().unwrap();
        cnf.creds = Some(("id".into(), "secret".into()));
        cnf.validate().unwrap();
        cnf
    }

    #[test]
    fn minimal_config_synthesizes_controlplane_pool() {
        let cnf = load_with_creds(MINIMAL);
        assert_eq!(
            cnf.node_pools().keys().cloned().collect::<Vec<_>>(),
            vec!["controlplane".to_string()]
        );
        let cp = cnf.node_pool("controlplane").unwrap();
        assert_eq!(cp.node_numbers(), vec![1]);
        assert!(cp.is_server("controlplane"));
    }

    #[test]
    fn high_availability_violation_is_a_config_error() {
        let src = format!(
            "{MINIMAL}\n  allow-high-availability: false\nnode-pools:\n  controlplane:\n    nodes: 2\n"
        );
        let mut cnf = Cnf::parse_source(&src).unwrap();
        cnf.synthesize_default_controlplane_pool();
        cnf.resolve_ssh_key_paths().unwrap();
        cnf.creds = Some(("id".into(), "secret".into()));
        let err = cnf.validate().unwrap_err();
        match err {
            ControlPlaneError::Config(msg) => {
                assert_eq!(
                    msg,
                    "node-pools.controlplane.nodes must be 1 when high availability is disabled"
                );
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn empty_node_pool_is_a_config_error() {
        let src = format!("{MINIMAL}\nnode-pools:\n  worker1:\n    nodes: 0\n");
        let mut cnf = Cnf::parse_source(&src).unwrap();
        cnf.synthesize_default_controlplane_pool();
        cnf.resolve_ssh_key_paths().unwrap();
        cnf.creds = Some(("id".into(), "secret".into()));
        let err = cnf.validate().unwrap_err();
        match err {
            ControlPlaneError::Config(msg) => {
                assert_eq!(msg, "node-pools.worker1.nodes is required");
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn node_numbers_normalizes_integer_count() {
        let pool = CnfNodePool {
            nodes: NodesSpec::Count(3),
            node_config: serde_json::Value::Null,
            rke2_config: serde_json::Value::Null,
        };
        assert_eq!(pool.node_numbers(), vec![1, 2, 3]);
    }

    #[test]
    fn node_numbers_normalizes_explicit_list() {
        let pool = CnfNodePool {
            nodes: NodesSpec::List(vec![3, 1, 2, 1]),
            node_config: serde_json::Value::Null,
            rke2_config: serde_json::Value::Null,
        };
        assert_eq!(pool.node_numbers(), vec![1, 2, 3]);
    }

    #[test]
    fn export_then_load_round_trips() {
        let cnf = load_with_creds(MINIMAL);
        let exported = cnf.export().unwrap();
        let reloaded = Cnf::load(&exported).unwrap();
        assert_eq!(reloaded.cluster.name, cnf.cluster.name);
        assert_eq!(reloaded.creds, cnf.creds);
    }
}
