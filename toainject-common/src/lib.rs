#![cfg_attr(not(any(feature = "user", test)), no_std)]

//! Shared between the eBPF programs and the user space loader.
//!
//! Everything that touches packet bytes lives here so it can be exercised on
//! the host against [`VecSkb`] and compiled unchanged for `bpfel-unknown-none`.

pub mod csum;
pub mod engine;
pub mod hdr;
pub mod option;
pub mod skb;
pub mod sockops;
#[cfg(any(feature = "user", test))]
pub mod vec_skb;

pub use engine::{inject, Action, Skip, Verdict};
pub use option::{Toa, ToaOverride, ToaV4, ToaV6};
pub use skb::SkbBuf;
#[cfg(any(feature = "user", test))]
pub use vec_skb::VecSkb;

/// Name of the TC classifier inside the compiled object.
pub const TC_PROGRAM: &str = "toainject";
/// Name of the sock_ops program inside the compiled object.
pub const SOCKOPS_PROGRAM: &str = "toainject_sockops";
/// Name of the single-entry array map holding a [`ToaOverride`].
pub const OVERRIDE_MAP: &str = "TOA_OVERRIDE";
