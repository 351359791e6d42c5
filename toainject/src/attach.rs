use std::{fmt, fs::File, net::Ipv4Addr, path::Path, process::Command};

use anyhow::{bail, Context as _};
use aya::{
    maps::Array,
    programs::{tc, SchedClassifier, SockOps, TcAttachType},
    Bpf,
};
use aya_log::BpfLogger;
use clap::ValueEnum;
use log::{debug, info, warn};
use toainject_common::{ToaOverride, OVERRIDE_MAP, SOCKOPS_PROGRAM, TC_PROGRAM};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    Egress,
    Ingress,
}

impl From<Direction> for TcAttachType {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Egress => TcAttachType::Egress,
            Direction::Ingress => TcAttachType::Ingress,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Egress => f.write_str("egress"),
            Direction::Ingress => f.write_str("ingress"),
        }
    }
}

fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {}", ret);
    }
}

/// Loads the compiled object and forwards its log lines to `log`.
pub fn load(object: &Path) -> Result<Bpf, anyhow::Error> {
    bump_memlock_rlimit();

    let mut bpf = Bpf::load_file(object)
        .with_context(|| format!("failed to load eBPF object {}", object.display()))?;
    if let Err(e) = BpfLogger::init(&mut bpf) {
        warn!("failed to initialize eBPF logger: {}", e);
    }
    Ok(bpf)
}

/// Where the classifier went.
#[derive(Debug, Default)]
pub struct TcAttachment {
    pub ifaces: Vec<String>,
    /// Interfaces whose `clsact` qdisc was created here and is removed again
    /// on shutdown. A qdisc that was already present is left to its owner.
    pub added_clsact: Vec<String>,
}

/// Attaches the classifier to every interface it can. Interfaces that refuse
/// are skipped.
pub fn tc(
    bpf: &mut Bpf,
    ifaces: &[String],
    direction: Direction,
) -> Result<TcAttachment, anyhow::Error> {
    let program: &mut SchedClassifier = bpf
        .program_mut(TC_PROGRAM)
        .with_context(|| format!("program {} not found in object", TC_PROGRAM))?
        .try_into()?;
    program.load()?;

    let mut attachment = TcAttachment::default();
    for iface in ifaces {
        match tc::qdisc_add_clsact(iface) {
            Ok(()) => attachment.added_clsact.push(iface.clone()),
            // usually there already is one
            Err(e) => debug!("failed to add clsact qdisc to {}: {}", iface, e),
        }
        match program.attach(iface, direction.into()) {
            Ok(_) => {
                info!("attached to {} of {}", direction, iface);
                attachment.ifaces.push(iface.clone());
            }
            Err(e) => warn!("failed to attach to {} of {}: {}", direction, iface, e),
        }
    }

    if attachment.ifaces.is_empty() {
        remove_clsact(&attachment.added_clsact);
        bail!("could not attach to any interface, CAP_NET_ADMIN is required");
    }
    Ok(attachment)
}

fn clsact_del(iface: &str) -> Command {
    let mut cmd = Command::new("tc");
    cmd.args(["qdisc", "del", "dev", iface, "clsact"]);
    cmd
}

/// Deletes the given `clsact` qdiscs along with any filter still on them.
pub fn remove_clsact(ifaces: &[String]) {
    for iface in ifaces {
        match clsact_del(iface).output() {
            Ok(out) if out.status.success() => info!("removed clsact qdisc from {}", iface),
            Ok(out) => warn!(
                "failed to remove clsact qdisc from {}: {}",
                iface,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Err(e) => warn!("failed to run tc for {}: {}", iface, e),
        }
    }
}

/// Attaches the sock_ops program to a cgroup v2 and installs the optional
/// fixed endpoint.
pub fn sockops(
    bpf: &mut Bpf,
    cgroup_path: &Path,
    ovr: Option<ToaOverride>,
) -> Result<(), anyhow::Error> {
    // fill the map before anything can run
    if let Some(ovr) = ovr {
        let mut config: Array<_, ToaOverride> = bpf
            .map_mut(OVERRIDE_MAP)
            .with_context(|| format!("map {} not found in object", OVERRIDE_MAP))?
            .try_into()?;
        config.set(0, ovr, 0)?;
        info!(
            "advertising {}:{} instead of the peer",
            Ipv4Addr::from(ovr.ip),
            u16::from_be_bytes(ovr.port)
        );
    }

    let program: &mut SockOps = bpf
        .program_mut(SOCKOPS_PROGRAM)
        .with_context(|| format!("program {} not found in object", SOCKOPS_PROGRAM))?
        .try_into()?;
    let cgroup = File::open(cgroup_path)
        .with_context(|| format!("failed to open cgroup {}", cgroup_path.display()))?;
    program.load()?;
    program.attach(cgroup)?;
    Ok(())
}
