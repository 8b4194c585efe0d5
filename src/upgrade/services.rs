//! Coordination with the background services kiln manages.
//!
//! The upgrade engine only needs three capabilities from a service manager:
//! list what is running, stop everything, and start named services with a given
//! executable. Failures here are reported to the orchestrator, which logs them as
//! warnings; a stale service can be restarted by hand, a half-swapped binary cannot.

use anyhow::Result;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::constants::SERVICE_TIMEOUT;
use crate::core::KilnError;

/// Stop/start/query access to managed background services.
pub trait ServiceCoordinator: Send + Sync {
    /// Names of the services currently running.
    fn running_services(
        &self,
        server_url: Option<&str>,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Stop every managed service.
    fn stop_all(&self, server_url: Option<&str>) -> impl Future<Output = Result<()>> + Send;

    /// Start `names` using the executable at `exe`.
    fn start(
        &self,
        exe: &Path,
        names: &[String],
        server_url: Option<&str>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Coordinator for installs without managed services.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoServices;

impl ServiceCoordinator for NoServices {
    async fn running_services(&self, _server_url: Option<&str>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn stop_all(&self, _server_url: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn start(&self, _exe: &Path, _names: &[String], _server_url: Option<&str>) -> Result<()> {
        Ok(())
    }
}

/// Coordinator driving an external service manager program.
///
/// The program must understand:
///
/// ```text
/// <cmd> list [--server-url <url>]                  # one running service per line
/// <cmd> stop --all [--server-url <url>]
/// <cmd> start --exe <path> <names...> [--server-url <url>]
/// ```
///
/// Each invocation is bounded by a timeout and must exit 0.
#[derive(Debug, Clone)]
pub struct CommandServiceCoordinator {
    program: String,
    timeout: Duration,
}

impl CommandServiceCoordinator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: SERVICE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, operation: &str, args: Vec<String>, server_url: Option<&str>) -> Result<String> {
        let mut command = Command::new(&self.program);
        command.args(&args);
        if let Some(url) = server_url {
            command.arg("--server-url").arg(url);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running service manager: {} {}", self.program, args.join(" "));

        let service_error = |reason: String| KilnError::ServiceError {
            operation: operation.to_string(),
            reason,
        };

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output.map_err(|e| service_error(format!("{}: {e}", self.program)))?,
            Err(_) => {
                return Err(KilnError::Timeout {
                    operation: format!("{operation} services"),
                    seconds: self.timeout.as_secs(),
                }
                .into());
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(service_error(format!("{} ({})", output.status, stderr.trim())).into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ServiceCoordinator for CommandServiceCoordinator {
    async fn running_services(&self, server_url: Option<&str>) -> Result<Vec<String>> {
        let stdout = self.run("list", vec!["list".to_string()], server_url).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn stop_all(&self, server_url: Option<&str>) -> Result<()> {
        self.run("stop", vec!["stop".to_string(), "--all".to_string()], server_url).await?;
        Ok(())
    }

    async fn start(&self, exe: &Path, names: &[String], server_url: Option<&str>) -> Result<()> {
        let mut args = vec!["start".to_string(), "--exe".to_string(), exe.display().to_string()];
        args.extend(names.iter().cloned());
        self.run("start", args, server_url).await?;
        Ok(())
    }
}

/// The configured coordinator: an external program, or nothing.
#[derive(Debug, Clone)]
pub enum Services {
    None(NoServices),
    Command(CommandServiceCoordinator),
}

impl Services {
    /// Coordinator for the optional `service_command` setting.
    #[must_use]
    pub fn from_config(service_command: Option<&str>) -> Self {
        match service_command {
            Some(program) if !program.trim().is_empty() => {
                Self::Command(CommandServiceCoordinator::new(program.trim()))
            }
            _ => Self::None(NoServices),
        }
    }
}

impl ServiceCoordinator for Services {
    async fn running_services(&self, server_url: Option<&str>) -> Result<Vec<String>> {
        match self {
            Self::None(inner) => inner.running_services(server_url).await,
            Self::Command(inner) => inner.running_services(server_url).await,
        }
    }

    async fn stop_all(&self, server_url: Option<&str>) -> Result<()> {
        match self {
            Self::None(inner) => inner.stop_all(server_url).await,
            Self::Command(inner) => inner.stop_all(server_url).await,
        }
    }

    async fn start(&self, exe: &Path, names: &[String], server_url: Option<&str>) -> Result<()> {
        match self {
            Self::None(inner) => inner.start(exe, names, server_url).await,
            Self::Command(inner) => inner.start(exe, names, server_url).await,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::write_executable;
    use tempfile::TempDir;

    fn manager_script(log: &Path) -> String {
        format!(
            "#!/bin/sh\n\
            echo \"$*\" >> \"{}\"\n\
            case \"$1\" in\n  list) printf 'api\\n\\nretrieval\\n' ;;\n  *) ;;\nesac\n\
            exit 0\n",
            log.display()
        )
    }

    #[tokio::test]
    async fn test_command_coordinator_round() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("calls.log");
        let program = write_executable(&temp.path().join("services"), &manager_script(&log));
        let coordinator = CommandServiceCoordinator::new(program.display().to_string());

        let running = coordinator.running_services(Some("http://127.0.0.1:8080")).await.unwrap();
        assert_eq!(running, vec!["api".to_string(), "retrieval".to_string()]);

        coordinator.stop_all(None).await.unwrap();
        coordinator.start(Path::new("/opt/kiln/kiln"), &running, None).await.unwrap();

        let calls = std::fs::read_to_string(&log).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(
            calls,
            vec![
                "list --server-url http://127.0.0.1:8080",
                "stop --all",
                "start --exe /opt/kiln/kiln api retrieval",
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_manager_is_service_error() {
        let temp = TempDir::new().unwrap();
        let program =
            write_executable(&temp.path().join("services"), "#!/bin/sh\necho boom >&2\nexit 2\n");
        let coordinator = CommandServiceCoordinator::new(program.display().to_string());

        let err = coordinator.stop_all(None).await.unwrap_err();
        let message = err.to_string();
        assert!(matches!(err.downcast_ref::<KilnError>(), Some(KilnError::ServiceError { .. })));
        assert!(message.contains("boom"));
    }

    #[tokio::test]
    async fn test_hanging_manager_times_out() {
        let temp = TempDir::new().unwrap();
        let program = write_executable(&temp.path().join("services"), "#!/bin/sh\nsleep 30\n");
        let coordinator = CommandServiceCoordinator::new(program.display().to_string())
            .with_timeout(Duration::from_millis(200));

        let err = coordinator.running_services(None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<KilnError>(), Some(KilnError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_from_config() {
        assert!(matches!(Services::from_config(None), Services::None(_)));
        assert!(matches!(Services::from_config(Some("  ")), Services::None(_)));
        assert!(matches!(Services::from_config(Some("kiln-services")), Services::Command(_)));
        assert!(Services::from_config(None).running_services(None).await.unwrap().is_empty());
    }
}
