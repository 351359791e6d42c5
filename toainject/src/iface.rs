use std::{fs, path::Path};

use anyhow::{bail, Context as _};
use log::debug;

const SYS_CLASS_NET: &str = "/sys/class/net";

const IFF_UP: u32 = 0x1;
const IFF_LOOPBACK: u32 = 0x8;

/// Container plumbing; traffic there is seen again on the host side.
const SKIPPED_PREFIXES: [&str; 2] = ["veth", "docker"];

/// Parses the hex value of `/sys/class/net/<iface>/flags`.
fn parse_flags(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u32::from_str_radix(digits, 16).ok()
}

fn eligible(name: &str, flags: u32) -> bool {
    flags & IFF_UP != 0
        && flags & IFF_LOOPBACK == 0
        && !SKIPPED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Every interface that is up and is neither loopback nor container plumbing.
pub fn discover() -> Result<Vec<String>, anyhow::Error> {
    let net_path = Path::new(SYS_CLASS_NET);
    let entries = fs::read_dir(net_path)
        .with_context(|| format!("failed to list {}", net_path.display()))?;

    let mut ifaces: Vec<String> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name().into_string().ok()?;
            let raw = fs::read_to_string(entry.path().join("flags")).ok()?;
            let flags = parse_flags(&raw)?;
            if eligible(&name, flags) {
                Some(name)
            } else {
                debug!("skipping interface {} (flags {:#x})", name, flags);
                None
            }
        })
        .collect();
    ifaces.sort();

    if ifaces.is_empty() {
        bail!("no interface is up apart from loopback and container links");
    }
    Ok(ifaces)
}
