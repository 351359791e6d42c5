#![no_std]
#![no_main]

mod tc_buf;

use aya_bpf::{
    bindings::{BPF_SOCK_OPS_WRITE_HDR_OPT_CB_FLAG, TC_ACT_OK},
    cty::c_void,
    helpers::{bpf_reserve_hdr_opt, bpf_sock_ops_cb_flags_set, bpf_store_hdr_opt},
    macros::{classifier, map, sock_ops},
    maps::Array,
    programs::{SockOpsContext, TcContext},
};
use aya_log_ebpf::{debug, info};
use toainject_common::{
    engine::{inject, Verdict},
    sockops::{on_sock_event, SockEvent, SockOp, SockReply},
    ToaOverride,
};

use crate::tc_buf::TcBuf;

#[map(name = "TOA_OVERRIDE")]
static TOA_OVERRIDE: Array<ToaOverride> = Array::with_max_entries(1, 0);

#[classifier]
pub fn toainject(ctx: TcContext) -> i32 {
    match try_toainject(ctx) {
        Ok(ret) => ret,
        Err(ret) => ret,
    }
}

#[inline(always)]
fn try_toainject(mut ctx: TcContext) -> Result<i32, i32> {
    let verdict = {
        let mut buf = TcBuf::new(&mut ctx);
        inject(&mut buf)
    };

    match verdict {
        Verdict::Injected(toa) => info!(
            &ctx,
            "toa injected => ip:{:i} port:{}",
            u32::from_be_bytes(toa.ip),
            toa.port()
        ),
        Verdict::Pass(skip) => debug!(&ctx, "pass: {}", skip.as_str()),
        Verdict::Degraded(skip) => info!(&ctx, "frame grown but {}", skip.as_str()),
    }

    // fail open: never drop
    Ok(TC_ACT_OK)
}

#[sock_ops]
pub fn toainject_sockops(ctx: SockOpsContext) -> u32 {
    match try_toainject_sockops(ctx) {
        Ok(ret) => ret,
        Err(ret) => ret,
    }
}

#[inline(always)]
fn try_toainject_sockops(ctx: SockOpsContext) -> Result<u32, u32> {
    let skops = unsafe { ctx.ops.as_mut() }.ok_or(1u32)?;
    let event = SockEvent {
        op: SockOp::from_raw(ctx.op()),
        remote_ip4: ctx.remote_ip4().to_ne_bytes(),
        // upper half of the word, network order
        remote_port: (u32::from_be(ctx.remote_port()) as u16).to_be_bytes(),
        tcp_flags: skops.skb_tcp_flags as u8,
    };

    match on_sock_event(&event, TOA_OVERRIDE.get(0)) {
        SockReply::EnableHdrOptWrite => unsafe {
            bpf_sock_ops_cb_flags_set(
                skops,
                (skops.bpf_sock_ops_cb_flags | BPF_SOCK_OPS_WRITE_HDR_OPT_CB_FLAG) as i32,
            );
        },
        SockReply::Reserve(len) => unsafe {
            bpf_reserve_hdr_opt(skops, len, 0);
        },
        SockReply::Write(toa) => {
            let bytes = toa.to_bytes();
            let ret = unsafe {
                bpf_store_hdr_opt(
                    skops,
                    bytes.as_ptr() as *const c_void,
                    bytes.len() as u32,
                    0,
                )
            };
            if ret == 0 {
                info!(
                    &ctx,
                    "toa written => ip:{:i} port:{}",
                    u32::from_be_bytes(toa.ip),
                    toa.port()
                );
            } else {
                debug!(&ctx, "toa store refused: {}", ret);
            }
        }
        SockReply::Ignore => {}
    }

    Ok(1)
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
