use std::process::Command;

use anyhow::{bail, Context as _};
use clap::Parser;

use crate::build_ebpf::{build_ebpf, Architecture, Options as BuildOptions};

#[derive(Debug, Parser)]
pub struct Options {
    /// Set the endianness of the BPF target
    #[clap(default_value = "bpfel-unknown-none", long)]
    pub bpf_target: Architecture,
    /// Build and run the release target
    #[clap(long)]
    pub release: bool,
    /// The command used to wrap your application
    #[clap(short, long, default_value = "sudo -E")]
    pub runner: String,
    /// Arguments to pass to your application
    #[clap(name = "args", last = true)]
    pub run_args: Vec<String>,
}

/// Build the userspace loader
fn build(opts: &Options) -> Result<(), anyhow::Error> {
    let mut args = vec!["build"];
    if opts.release {
        args.push("--release")
    }
    let status = Command::new("cargo")
        .args(&args)
        .status()
        .context("failed to run cargo")?;
    if !status.success() {
        bail!("building the loader failed: {}", status);
    }
    Ok(())
}

/// Build both halves, then run the loader with the fresh object
pub fn run(opts: Options) -> Result<(), anyhow::Error> {
    let build_opts = BuildOptions {
        target: opts.bpf_target,
        release: opts.release,
    };
    let object = build_opts.object_path();
    build_ebpf(build_opts).context("Error while building eBPF program")?;
    build(&opts).context("Error while building userspace application")?;

    let profile = if opts.release { "release" } else { "debug" };
    let bin_path = format!("target/{profile}/toainject");
    let object = object.display().to_string();

    let mut args: Vec<&str> = opts.runner.trim().split_terminator(' ').collect();
    args.push(bin_path.as_str());
    args.push("--object");
    args.push(object.as_str());
    args.extend(opts.run_args.iter().map(String::as_str));

    let (program, rest) = args.split_first().context("empty runner")?;
    let status = Command::new(program)
        .args(rest)
        .status()
        .context("failed to run the command")?;

    if !status.success() {
        bail!("Failed to run `{}`", args.join(" "));
    }
    Ok(())
}
