use std::collections::HashMap;
use std::process::Command;

use tracing::debug;

use crate::error::{ImageError, Result};

/// Run `program` with `args` and extra environment `env`, waiting for it to
/// finish. Returns captured stdout; a spawn failure or non-zero exit status
/// becomes [`ImageError::External`] carrying the captured stderr.
pub fn run_program(program: &str, args: &[String], env: &HashMap<String, String>) -> Result<String> {
    debug!("Running {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .envs(env)
        .output()
        .map_err(|e| ImageError::External {
            program: program.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            format!("exited with {}: {}", output.status, stderr)
        };
        return Err(ImageError::External {
            program: program.to_string(),
            message,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
