//! Accelerator detection.
//!
//! Detection only looks for NVIDIA hardware through `nvidia-smi`. Any
//! failure to run or parse the tool is treated as "no accelerator".

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// A detected accelerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInfo {
    pub name: String,
    pub memory_mb: u64,
}

/// Source of accelerator information for the inference engine.
pub trait GpuProbe: Send + Sync {
    /// Returns the first usable accelerator, or `None`.
    fn probe(&self) -> Option<GpuInfo>;
}

/// Longest a single `nvidia-smi` run may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probe backed by `nvidia-smi --query-gpu`.
#[derive(Debug, Clone, Default)]
pub struct NvidiaSmiProbe;

impl NvidiaSmiProbe {
    pub fn new() -> Self {
        Self
    }
}

impl GpuProbe for NvidiaSmiProbe {
    fn probe(&self) -> Option<GpuInfo> {
        let Ok(tool) = which::which("nvidia-smi") else {
            debug!("nvidia-smi not found on PATH, assuming no GPU");
            return None;
        };

        let mut child = match Command::new(tool)
            .args([
                "--query-gpu=name,memory.total",
                "--format=csv,noheader,nounits",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                debug!("Failed to run nvidia-smi: {}", e);
                return None;
            }
        };

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() < PROBE_TIMEOUT => {
                    std::thread::sleep(Duration::from_millis(25));
                }
                Ok(None) => {
                    debug!("nvidia-smi timed out after {:?}", PROBE_TIMEOUT);
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                Err(e) => {
                    debug!("Error waiting for nvidia-smi: {}", e);
                    return None;
                }
            }
        };

        if !status.success() {
            debug!("nvidia-smi exited with {}", status);
            return None;
        }

        let mut stdout = String::new();
        child.stdout.take()?.read_to_string(&mut stdout).ok()?;

        let info = parse_nvidia_smi(&stdout);
        match &info {
            Some(gpu) => info!("Detected GPU: {} ({} MiB)", gpu.name, gpu.memory_mb),
            None => debug!("Could not parse nvidia-smi output: {:?}", stdout),
        }
        info
    }
}

/// Parse the first line of `nvidia-smi --format=csv,noheader,nounits` output.
pub fn parse_nvidia_smi(output: &str) -> Option<GpuInfo> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut fields = line.split(',').map(str::trim);

    let name = fields.next().filter(|n| !n.is_empty())?;
    let memory = fields.next()?;

    Some(GpuInfo {
        name: name.to_string(),
        memory_mb: memory.parse().unwrap_or(0),
    })
}
