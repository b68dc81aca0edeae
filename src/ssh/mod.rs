/// One-shot SSH execution against a node's public IP, with ephemeral key
/// material. Built the way the command-execution utilities wrap
/// `tokio::process::Command`, adapted for a remote invocation instead of a
/// local tool.
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{ControlPlaneError, Result};

/// Abstraction over remote command execution so the node engine can be
/// driven against an in-memory fake in tests.
#[async_trait]
pub trait SshExecutor: Send + Sync {
    async fn ssh(&self, public_ip: &str, private_key: &str, command: &str) -> Result<String>;

    /// Base64-wrap `script` and pipe it through `bash` on the remote host.
    async fn ssh_run_script(
        &self,
        public_ip: &str,
        private_key: &str,
        script: &str,
    ) -> Result<String> {
        let encoded = BASE64.encode(script.as_bytes());
        let wrapped = format!("echo {encoded} | base64 -d | bash");
        self.ssh(public_ip, private_key, &wrapped).await
    }

    async fn kubectl(&self, public_ip: &str, private_key: &str, args: &str) -> Result<String> {
        let command = format!(
            "KUBECONFIG=/etc/rancher/rke2/rke2.yaml /var/lib/rancher/rke2/bin/kubectl {args}"
        );
        self.ssh(public_ip, private_key, &command).await
    }
}

/// Real executor that shells out to the system `ssh` binary.
pub struct RealSshExecutor;

#[async_trait]
impl SshExecutor for RealSshExecutor {
    async fn ssh(&self, public_ip: &str, private_key: &str, command: &str) -> Result<String> {
        let dir = tempfile::tempdir()?;
        let key_path = dir.path().join("id_ed25519");
        {
            let mut file = std::fs::File::create(&key_path)?;
            file.write_all(private_key.as_bytes())?;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        let output = Command::new("ssh")
            .arg("-i")
            .arg(&key_path)
            .args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
            ])
            .arg(format!("root@{public_ip}"))
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        // `dir` drops (and is removed) once this scope exits, regardless
        // of success or failure below.
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(ControlPlaneError::CloudApi(format!(
                "ssh to {public_ip} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )))
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory fake standing in for a real SSH connection, the Rust
    /// equivalent of monkeypatching `Node.ssh` in the original test suite.
    #[derive(Default)]
    pub struct FakeSshExecutor {
        pub responses: Mutex<HashMap<String, String>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeSshExecutor {
        pub fn respond(&self, command_substring: &str, response: &str) {
            self.responses
                .lock()
                .unwrap()
                .insert(command_substring.to_string(), response.to_string());
        }
    }

    #[async_trait]
    impl SshExecutor for FakeSshExecutor {
        async fn ssh(&self, _public_ip: &str, _private_key: &str, command: &str) -> Result<String> {
            self.calls.lock().unwrap().push(command.to_string());
            let responses = self.responses.lock().unwrap();
            for (needle, response) in responses.iter() {
                if command.contains(needle.as_str()) {
                    return Ok(response.clone());
                }
            }
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeSshExecutor;
    use super::*;

    #[tokio::test]
    async fn ssh_run_script_base64_wraps_the_script() {
        let fake = FakeSshExecutor::default();
        fake.respond("base64 -d | bash", "ok");
        let result = fake.ssh_run_script("1.2.3.4", "key", "echo hi").await;
        assert_eq!(result.unwrap(), "ok");
        assert!(fake.calls.lock().unwrap()[0].contains("base64 -d | bash"));
    }

    #[tokio::test]
    async fn kubectl_sets_kubeconfig_env() {
        let fake = FakeSshExecutor::default();
        fake.respond("kubectl version", "v1.31.1+rke2r1");
        let result = fake.kubectl("1.2.3.4", "key", "version").await.unwrap();
        assert_eq!(result, "v1.31.1+rke2r1");
    }
}
