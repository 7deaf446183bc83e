use crate::{
    config::RejectConfig,
    errors::{get_last_error, set_last_error, ErrorCode},
    handle_registry::{register_handle, unregister_handle, with_handle, HandleId},
    prefix::Prefix,
    reject::RejectCache,
    telemetry,
};
use log::info;
use once_cell::sync::OnceCell;
use std::{
    ffi::{CStr, CString},
    net::IpAddr,
    os::raw::c_char,
};

/// Opaque cache handle; 0 is never valid.
pub type CacheHandle = HandleId;

/// Called once per deferred disconnect with the connection id given to
/// `addrcache_check` and a NUL-terminated reason.
pub type CloseCallback = unsafe extern "C" fn(conn: u64, reason: *const c_char);

// ─────────────────────────── helpers ─────────────────────────────────── //

fn ensure_logging() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        // hosts that already installed a logger keep theirs
        let _ = env_logger::builder()
            .format_timestamp(None)
            .try_init();
    });
}

#[inline]
fn cstr<'a>(p: *const c_char) -> Result<&'a str, ErrorCode> {
    if p.is_null() {
        return Err(ErrorCode::Utf8Error);
    }
    unsafe { CStr::from_ptr(p) }
        .to_str()
        .map_err(|_| ErrorCode::Utf8Error)
}

#[inline]
fn parse_ip(s: &str) -> Result<IpAddr, ErrorCode> {
    s.trim().parse().map_err(|_| ErrorCode::InvalidPrefix)
}

/// Record the outcome for `addrcache_last_error` and hand it back.
fn finish(code: ErrorCode) -> ErrorCode {
    set_last_error(code);
    code
}

// ─── small helper to turn Result<T,ErrorCode> into early-return ──────────
macro_rules! try_c { ($expr:expr) => { match $expr {
    Ok(v)  => v,
    Err(e) => return finish(e),
}}}

// ───────────────────────── lifetime ──────────────────────────────────── //

/// Create a reject cache. `capacity == 0` means unbounded.
/// Returns `Success` **and** stores the handle in `*out`
/// -- or an error code otherwise.
#[no_mangle]
pub extern "C" fn addrcache_open(
    reject_ban_time: u64,
    reject_after_count: u32,
    capacity: usize,
    out: *mut CacheHandle,
) -> ErrorCode {
    ensure_logging();
    telemetry::init();
    if out.is_null() {
        return finish(ErrorCode::InvalidHandle);
    }
    let config = RejectConfig {
        reject_ban_time,
        reject_after_count,
        capacity: (capacity > 0).then_some(capacity),
        ..RejectConfig::default()
    };
    let cache = try_c!(RejectCache::new(config).map_err(|e| ErrorCode::from(&e)));
    let id = register_handle(cache);
    info!("[ABI] Opened cache handle {}", id);
    unsafe { *out = id };
    finish(ErrorCode::Success)
}

/// Like `addrcache_open`, configured from `ADDRCACHE_*` environment variables.
#[no_mangle]
pub extern "C" fn addrcache_open_from_env(out: *mut CacheHandle) -> ErrorCode {
    ensure_logging();
    telemetry::init();
    if out.is_null() {
        return finish(ErrorCode::InvalidHandle);
    }
    let cache = try_c!(RejectCache::new(RejectConfig::from_env()).map_err(|e| ErrorCode::from(&e)));
    let id = register_handle(cache);
    info!("[ABI] Opened cache handle {} from environment", id);
    unsafe { *out = id };
    finish(ErrorCode::Success)
}

#[no_mangle]
pub extern "C" fn addrcache_close(h: CacheHandle) -> ErrorCode {
    info!("[ABI] Closing cache handle {}", h);
    finish(match unregister_handle(h) {
        Ok(()) => ErrorCode::Success,
        Err(code) => code,
    })
}

// ───────────────────────── cache operations ──────────────────────────── //

/// Record a rejected connection from `addr_utf8`.
#[no_mangle]
pub extern "C" fn addrcache_add(h: CacheHandle, addr_utf8: *const c_char) -> ErrorCode {
    let ip = try_c!(cstr(addr_utf8).and_then(parse_ip));
    let res = try_c!(with_handle(h, |c| c.add(ip)));
    finish(match res {
        Ok(()) => ErrorCode::Success,
        Err(e) => ErrorCode::from(&e),
    })
}

/// Look up `addr_utf8`. On a hit `*out_hit` is true and `conn` is queued
/// for `addrcache_flush_pending`; the host must stop serving it.
#[no_mangle]
pub extern "C" fn addrcache_check(
    h: CacheHandle,
    addr_utf8: *const c_char,
    conn: u64,
    out_hit: *mut bool,
) -> ErrorCode {
    if out_hit.is_null() {
        return finish(ErrorCode::InvalidHandle);
    }
    let ip = try_c!(cstr(addr_utf8).and_then(parse_ip));
    let hit = try_c!(with_handle(h, |c| c.check(ip, conn)));
    unsafe { *out_hit = hit };
    finish(ErrorCode::Success)
}

/// Expire stale entries. `out_removed` may be NULL.
#[no_mangle]
pub extern "C" fn addrcache_sweep(h: CacheHandle, out_removed: *mut u64) -> ErrorCode {
    let removed = try_c!(with_handle(h, |c| c.sweep()));
    if !out_removed.is_null() {
        unsafe { *out_removed = removed as u64 };
    }
    finish(ErrorCode::Success)
}

/// Close queued connections through `cb`, oldest first. `out_closed` may be NULL.
///
/// # Safety
/// `cb` must be safe to call with any queued connection id; it must not call
/// back into this cache handle.
#[no_mangle]
pub unsafe extern "C" fn addrcache_flush_pending(
    h: CacheHandle,
    cb: Option<CloseCallback>,
    out_closed: *mut u64,
) -> ErrorCode {
    let Some(cb) = cb else {
        return finish(ErrorCode::InvalidHandle);
    };
    let closed = try_c!(with_handle(h, |c| {
        c.flush_pending(&mut |conn: u64, reason: &str| {
            let reason = CString::new(reason).unwrap_or_default();
            unsafe { cb(conn, reason.as_ptr()) };
        })
    }));
    if !out_closed.is_null() {
        unsafe { *out_closed = closed as u64 };
    }
    finish(ErrorCode::Success)
}

/// Forget an address (`"1.2.3.4"`) or every address inside a mask
/// (`"10.0.0.0/8"`). `NotFound` when nothing was cached there.
#[no_mangle]
pub extern "C" fn addrcache_remove(h: CacheHandle, cidr_utf8: *const c_char) -> ErrorCode {
    let text = try_c!(cstr(cidr_utf8));
    let Some(mask) = Prefix::from_text(None, text) else {
        return finish(ErrorCode::InvalidPrefix);
    };
    let removed = try_c!(with_handle(h, |c| c.remove_mask(&mask)));
    finish(if removed > 0 {
        ErrorCode::Success
    } else {
        ErrorCode::NotFound
    })
}

/// Drop every cached entry.
#[no_mangle]
pub extern "C" fn addrcache_flush(h: CacheHandle) -> ErrorCode {
    try_c!(with_handle(h, |c| c.flush()));
    finish(ErrorCode::Success)
}

#[no_mangle]
pub extern "C" fn addrcache_len(h: CacheHandle, out: *mut u64) -> ErrorCode {
    if out.is_null() {
        return finish(ErrorCode::InvalidHandle);
    }
    let len = try_c!(with_handle(h, |c| c.len()));
    unsafe { *out = len as u64 };
    finish(ErrorCode::Success)
}

// ───────────────────── convenience ─────────────────────────────────── //

#[no_mangle]
pub extern "C" fn addrcache_last_error() -> ErrorCode {
    get_last_error()
}

#[no_mangle]
pub extern "C" fn addrcache_strerror(code: ErrorCode) -> *const c_char {
    code.as_cstr().as_ptr()
}
