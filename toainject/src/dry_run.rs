//! Offline check of the classifier: feed it a frame, print what it did.

use anyhow::Context as _;
use toainject_common::{inject, Verdict, VecSkb};

/// Accepts plain hex, optionally split by whitespace or colons.
fn decode(frame: &str) -> Result<Vec<u8>, anyhow::Error> {
    let digits: String = frame
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(digits).context("frame is not valid hex")
}

fn process(frame: Vec<u8>) -> (Verdict, Vec<u8>) {
    let mut skb = VecSkb::new(frame);
    let verdict = inject(&mut skb);
    (verdict, skb.into_inner())
}

fn describe(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Injected(toa) => format!(
            "injected kind={} len={} ip={} port={}",
            toa.kind,
            toa.len,
            std::net::Ipv4Addr::from(toa.ip),
            toa.port()
        ),
        Verdict::Pass(skip) => format!("passed unmodified: {}", skip.as_str()),
        Verdict::Degraded(skip) => format!("grown but incomplete: {}", skip.as_str()),
    }
}

pub fn run(frame: &str) -> Result<(), anyhow::Error> {
    let frame = decode(frame)?;
    let (verdict, out) = process(frame);
    println!("{}", describe(&verdict));
    println!("{}", hex::encode(out));
    Ok(())
}
