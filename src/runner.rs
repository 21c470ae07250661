//! External command execution — every `reg`, `net`, `powercfg`, `defrag` and
//! PowerShell invocation goes through a [`CommandRunner`] so it can be faked.

use crate::error::CommandError;
use std::process::Command;

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Best description of why the command failed: stderr, then stdout, then the exit code.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion. Only a launch failure is an `Err`; a non-zero
    /// exit status is reported through [`CommandOutput::success`].
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput>;

    /// Like [`run`](Self::run) but a non-zero exit status is also an error.
    fn check(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let output = self.run(program, args).map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })?;
        if output.success {
            Ok(output)
        } else {
            Err(CommandError::Failed {
                program: program.to_string(),
                detail: output.error_text(),
            })
        }
    }
}

/// Runs real processes without flashing a console window.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        log::debug!("Running {} {}", program, args.join(" "));
        let output = cmd.output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Helper function to run PowerShell scripts, returning trimmed stdout.
pub fn powershell(runner: &dyn CommandRunner, script: &str) -> Result<String, CommandError> {
    let output = runner.check(
        "powershell",
        &["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", script],
    )?;
    Ok(output.stdout.trim().to_string())
}

/// Whether the current process has administrator rights. Most actions need them.
pub fn is_elevated() -> bool {
    #[cfg(windows)]
    {
        use winapi::um::shlobj::IsUserAnAdmin;
        return unsafe { IsUserAnAdmin() != 0 };
    }

    #[cfg(not(windows))]
    false
}
