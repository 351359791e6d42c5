use std::{net::Ipv4Addr, path::PathBuf};

use clap::{Parser, Subcommand};
use log::info;
use tokio::signal::{self, unix::SignalKind};
use toainject_common::ToaOverride;

mod attach;
mod dry_run;
mod iface;

use attach::Direction;

#[derive(Debug, Parser)]
#[clap(about = "Carry the client address of TCP connections in a TOA option")]
struct Opt {
    /// Compiled eBPF object holding both programs
    #[clap(
        short,
        long,
        default_value = "target/bpfel-unknown-none/release/toainject"
    )]
    object: PathBuf,
    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(short, long)]
    verbose: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rewrite SYN packets on the wire with a TC classifier
    Tc {
        /// Interface to attach to, repeatable. Defaults to every interface
        /// that is up and is neither loopback nor a container veth
        #[clap(short, long)]
        iface: Vec<String>,
        #[clap(short, long, value_enum, default_value_t = Direction::Egress)]
        direction: Direction,
    },
    /// Let the kernel add the option through sock_ops callbacks
    Sockops {
        #[clap(short, long, default_value = "/sys/fs/cgroup")]
        cgroup_path: PathBuf,
        /// Advertise this address instead of the connection's peer
        #[clap(long, requires = "port")]
        ip: Option<Ipv4Addr>,
        #[clap(long, requires = "ip")]
        port: Option<u16>,
    },
    /// Run the classifier logic over one hex encoded Ethernet frame
    DryRun { frame: String },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let opt = Opt::parse();

    let level = if opt.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // dropping the loaded object detaches the programs
    let (bpf, added_clsact) = match opt.command {
        Command::DryRun { frame } => return dry_run::run(&frame),
        Command::Tc { iface, direction } => {
            let ifaces = if iface.is_empty() {
                iface::discover()?
            } else {
                iface
            };
            let mut bpf = attach::load(&opt.object)?;
            let attachment = attach::tc(&mut bpf, &ifaces, direction)?;
            info!("Attached to {} on {}", direction, attachment.ifaces.join(", "));
            (bpf, attachment.added_clsact)
        }
        Command::Sockops {
            cgroup_path,
            ip,
            port,
        } => {
            let ovr = match (ip, port) {
                (Some(ip), Some(port)) => Some(ToaOverride::new(ip.octets(), port.to_be_bytes())),
                _ => None,
            };
            let mut bpf = attach::load(&opt.object)?;
            attach::sockops(&mut bpf, &cgroup_path, ovr)?;
            info!("Attached sock_ops to cgroup {}", cgroup_path.display());
            (bpf, Vec::new())
        }
    };

    info!("Attach Successfully! Waiting for Ctrl-C...");
    let res = wait_for_shutdown().await;
    info!("Exiting...");

    drop(bpf);
    attach::remove_clsact(&added_clsact);
    res
}

async fn wait_for_shutdown() -> Result<(), anyhow::Error> {
    let mut sigterm = signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        res = signal::ctrl_c() => res?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tc_defaults() {
        let opt = Opt::try_parse_from(["toainject", "tc"]).unwrap();
        assert_eq!(
            opt.object,
            PathBuf::from("target/bpfel-unknown-none/release/toainject")
        );
        match opt.command {
            Command::Tc { iface, direction } => {
                assert!(iface.is_empty());
                assert_eq!(direction, Direction::Egress);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tc_repeated_ifaces() {
        let opt = Opt::try_parse_from([
            "toainject", "tc", "-i", "eth0", "--iface", "eth1", "-d", "ingress",
        ])
        .unwrap();
        match opt.command {
            Command::Tc { iface, direction } => {
                assert_eq!(iface, vec!["eth0".to_string(), "eth1".to_string()]);
                assert_eq!(direction, Direction::Ingress);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_sockops_override_needs_both_halves() {
        assert!(Opt::try_parse_from(["toainject", "sockops", "--ip", "1.2.3.4"]).is_err());
        assert!(Opt::try_parse_from(["toainject", "sockops", "--port", "80"]).is_err());

        let opt = Opt::try_parse_from([
            "toainject",
            "sockops",
            "--ip",
            "114.114.114.114",
            "--port",
            "11451",
        ])
        .unwrap();
        match opt.command {
            Command::Sockops {
                cgroup_path,
                ip,
                port,
            } => {
                assert_eq!(cgroup_path, PathBuf::from("/sys/fs/cgroup"));
                assert_eq!(ip, Some(Ipv4Addr::new(114, 114, 114, 114)));
                assert_eq!(port, Some(11451));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bad_ip_rejected() {
        assert!(Opt::try_parse_from([
            "toainject", "sockops", "--ip", "1.2.3", "--port", "80"
        ])
        .is_err());
    }
}
