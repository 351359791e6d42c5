use std::{fmt, path::PathBuf, process::Command, str::FromStr};

use anyhow::{bail, Context as _};
use clap::Parser;

pub const EBPF_CRATE: &str = "toainject-ebpf";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Architecture {
    BpfEl,
    BpfEb,
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bpfel-unknown-none" => Architecture::BpfEl,
            "bpfeb-unknown-none" => Architecture::BpfEb,
            _ => return Err("invalid target".to_owned()),
        })
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Architecture::BpfEl => "bpfel-unknown-none",
            Architecture::BpfEb => "bpfeb-unknown-none",
        })
    }
}

#[derive(Debug, Parser)]
pub struct Options {
    /// Set the endianness of the BPF target
    #[clap(default_value = "bpfel-unknown-none", long)]
    pub target: Architecture,
    /// Build the release target
    #[clap(long)]
    pub release: bool,
}

impl Options {
    /// Where cargo leaves the object, relative to the workspace root.
    pub fn object_path(&self) -> PathBuf {
        let profile = if self.release { "release" } else { "debug" };
        PathBuf::from("target")
            .join(self.target.to_string())
            .join(profile)
            .join("toainject")
    }
}

pub fn build_ebpf(opts: Options) -> Result<(), anyhow::Error> {
    let target = format!("--target={}", opts.target);
    let mut args = vec!["build", target.as_str()];
    if opts.release {
        args.push("--release")
    }

    // RUSTUP_TOOLCHAIN is inherited from the xtask invocation; drop it so the
    // rust-toolchain.toml of the eBPF crate picks nightly
    let status = Command::new("cargo")
        .current_dir(EBPF_CRATE)
        .env_remove("RUSTUP_TOOLCHAIN")
        .args(&args)
        .status()
        .context("failed to run cargo for the eBPF crate")?;
    if !status.success() {
        bail!("building {} failed: {}", EBPF_CRATE, status);
    }
    Ok(())
}
