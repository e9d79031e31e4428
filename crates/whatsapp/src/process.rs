//! Process management for the Baileys sidecar.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use {
    anyhow::{Context, Result, bail},
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

/// Handle to a running sidecar process.
#[derive(Debug)]
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Gracefully stop the sidecar process.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping WhatsApp sidecar process");

        // SIGTERM first so the sidecar can flush credentials to disk.
        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill().await;
        }

        match tokio::time::timeout(std::time::Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(?status, "WhatsApp sidecar process exited");
            },
            Ok(Err(e)) => {
                warn!(error = %e, "error waiting for sidecar process");
            },
            Err(_) => {
                warn!("sidecar process did not exit gracefully, killing");
                let _ = self.child.kill().await;
            },
        }

        Ok(())
    }
}

/// Find the sidecar directory.
///
/// Searches in order:
/// 1. Explicit path if provided
/// 2. `PONTIS_SIDECAR_DIR` environment variable
/// 3. `sidecar/wa-baileys` relative to the executable, then to the cwd
pub fn find_sidecar_dir(explicit_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        if path.join("package.json").exists() {
            return Ok(path.to_path_buf());
        }
        bail!(
            "sidecar directory does not exist or missing package.json: {}",
            path.display()
        );
    }

    if let Ok(dir) = std::env::var("PONTIS_SIDECAR_DIR") {
        let path = PathBuf::from(&dir);
        if path.join("package.json").exists() {
            return Ok(path);
        }
        warn!(path = %dir, "PONTIS_SIDECAR_DIR set but package.json not found");
    }

    if let Ok(exe_path) = std::env::current_exe()
        && let Some(exe_dir) = exe_path.parent()
    {
        for rel in ["../sidecar/wa-baileys", "../../sidecar/wa-baileys"] {
            let candidate = exe_dir.join(rel);
            if candidate.join("package.json").exists() {
                return Ok(candidate);
            }
        }
    }

    for rel in ["sidecar/wa-baileys", "../sidecar/wa-baileys"] {
        let path = PathBuf::from(rel);
        if path.join("package.json").exists() {
            return Ok(path.canonicalize().unwrap_or(path));
        }
    }

    bail!(
        "WhatsApp sidecar not found. Set PONTIS_SIDECAR_DIR or ensure \
         sidecar/wa-baileys exists with package.json"
    )
}

/// Start the sidecar process.
///
/// Expects the sidecar to be built (`dist/index.js`); this never runs npm
/// on the operator's behalf.
pub async fn start_sidecar(
    sidecar_dir: &Path,
    port: u16,
    auth_dir: Option<PathBuf>,
) -> Result<SidecarProcess> {
    if !sidecar_dir.join("package.json").exists() {
        bail!("WhatsApp sidecar not found at {}", sidecar_dir.display());
    }
    if !sidecar_dir.join("dist/index.js").exists() {
        bail!(
            "WhatsApp sidecar at {} is not built. \
             Run `npm install && npm run build` there first.",
            sidecar_dir.display()
        );
    }

    info!(
        path = %sidecar_dir.display(),
        port,
        "starting WhatsApp sidecar process"
    );

    let mut cmd = Command::new("node");
    cmd.arg("dist/index.js")
        .current_dir(sidecar_dir)
        .env("PONTIS_SIDECAR_PORT", port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(auth_dir) = &auth_dir {
        cmd.env("PONTIS_AUTH_DIR", auth_dir);
    }

    let mut child = cmd.spawn().context("failed to spawn sidecar process")?;

    // Forward sidecar output into tracing, decoding pino JSON lines.
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.starts_with('{')
                    && let Ok(log) = serde_json::from_str::<serde_json::Value>(&line)
                {
                    let level = log.get("level").and_then(|v| v.as_u64()).unwrap_or(30);
                    let msg = log.get("msg").and_then(|v| v.as_str()).unwrap_or(&line);
                    match level {
                        10 | 20 => debug!(target: "wa_sidecar", "{}", msg),
                        30 => info!(target: "wa_sidecar", "{}", msg),
                        40 => warn!(target: "wa_sidecar", "{}", msg),
                        _ => error!(target: "wa_sidecar", "{}", msg),
                    }
                    continue;
                }
                info!(target: "wa_sidecar", "{}", line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "wa_sidecar", "{}", line);
            }
        });
    }

    // Give the process a moment to fail fast on port conflicts.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    match child.try_wait() {
        Ok(Some(status)) => {
            bail!("sidecar process exited immediately with status: {status}");
        },
        Ok(None) => {},
        Err(e) => {
            bail!("failed to check sidecar process status: {e}");
        },
    }

    info!(port, "WhatsApp sidecar process started");

    Ok(SidecarProcess { child, port })
}
