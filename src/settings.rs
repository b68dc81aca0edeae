/// Process-level configuration, read once at startup from the environment.
/// Distinct from `config::Cnf`, which is the per-request cluster document.

#[derive(Debug, Clone)]
pub struct Settings {
    pub kamatera_api_server: String,
    pub kamatera_api_client_id: Option<String>,
    pub kamatera_api_secret: Option<String>,
    pub rke2_version: String,
    pub log_level: String,
    pub log_format_json: bool,
    pub default_server_config: serde_json::Value,
    pub rke2_server_port: u16,
    pub rke2_kube_api_port: u16,
    pub task_worker_count: usize,
    pub http_bind: String,
}

const DEFAULT_SERVER_CONFIG_JSON: &str = r#"{
  "image": "ubuntu_22.04_64-bit",
  "cpu": "2B",
  "ram": "4096",
  "disk": "disk_size=60",
  "dailybackup": "no",
  "managed": "no",
  "billingcycle": "hourly",
  "monthlypackage": ""
}"#;

impl Default for Settings {
    fn default() -> Self {
        Self {
            kamatera_api_server: "https://cloudcli.cloudwm.com".to_string(),
            kamatera_api_client_id: None,
            kamatera_api_secret: None,
            rke2_version: "v1.31.1+rke2r1".to_string(),
            log_level: "info".to_string(),
            log_format_json: false,
            default_server_config: serde_json::from_str(DEFAULT_SERVER_CONFIG_JSON)
                .expect("built-in default server config is valid JSON"),
            rke2_server_port: 9345,
            rke2_kube_api_port: 6443,
            task_worker_count: 8,
            http_bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(v) = std::env::var("KAMATERA_API_SERVER") {
            settings.kamatera_api_server = v;
        }
        settings.kamatera_api_client_id = std::env::var("KAMATERA_API_CLIENT_ID").ok();
        settings.kamatera_api_secret = std::env::var("KAMATERA_API_SECRET").ok();
        if let Ok(v) = std::env::var("RKE2_VERSION") {
            settings.rke2_version = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            settings.log_level = v;
        }
        if let Ok(v) = std::env::var("LOG_FORMAT") {
            settings.log_format_json = v.eq_ignore_ascii_case("json");
        }
        if let Ok(v) = std::env::var("DEFAULT_SERVER_CONFIG") {
            if let Ok(parsed) = serde_json::from_str(&v) {
                settings.default_server_config = parsed;
            }
        }
        if let Ok(v) = std::env::var("RKE2_SERVER_PORT") {
            if let Ok(port) = v.parse() {
                settings.rke2_server_port = port;
            }
        }
        if let Ok(v) = std::env::var("RKE2_KUBE_API_PORT") {
            if let Ok(port) = v.parse() {
                settings.rke2_kube_api_port = port;
            }
        }
        if let Ok(v) = std::env::var("TASK_WORKER_COUNT") {
            if let Ok(n) = v.parse() {
                settings.task_worker_count = n;
            }
        }
        if let Ok(v) = std::env::var("HTTP_BIND") {
            settings.http_bind = v;
        }
        settings
    }

    /// Credentials from the environment, used as a fallback default when a
    /// request does not carry its own — never authoritative over a
    /// `Config`/task payload's embedded credentials.
    pub fn default_creds(&self) -> Option<(String, String)> {
        match (&self.kamatera_api_client_id, &self.kamatera_api_secret) {
            (Some(id), Some(secret)) => Some((id.clone(), secret.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_fallbacks() {
        let settings = Settings::default();
        assert_eq!(settings.kamatera_api_server, "https://cloudcli.cloudwm.com");
        assert_eq!(settings.rke2_server_port, 9345);
        assert_eq!(settings.rke2_kube_api_port, 6443);
        assert!(!settings.log_format_json);
    }
}
