//! Windows service control through `net stop` / `net start`.
//! `net` waits for the state change to finish, unlike `sc`.

use crate::error::CommandError;
use crate::runner::CommandRunner;

/// Stop a service and wait for it. Already stopped counts as success.
pub fn stop_service(runner: &dyn CommandRunner, name: &str) -> Result<String, CommandError> {
    match runner.check("net", &["stop", name]) {
        Ok(_) => Ok(format!("Stopped {}", name)),
        Err(CommandError::Failed { detail, .. }) if detail.to_lowercase().contains("is not started") => {
            Ok(format!("{} already stopped", name))
        }
        Err(e) => Err(e),
    }
}

/// Start a service. Already running counts as success.
pub fn start_service(runner: &dyn CommandRunner, name: &str) -> Result<String, CommandError> {
    match runner.check("net", &["start", name]) {
        Ok(_) => Ok(format!("Started {}", name)),
        Err(CommandError::Failed { detail, .. })
            if detail.to_lowercase().contains("already been started") =>
        {
            Ok(format!("{} already running", name))
        }
        Err(e) => Err(e),
    }
}
