use addrcache_core::*;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Mutex;

static CLOSED: Mutex<Vec<(u64, String)>> = Mutex::new(Vec::new());

unsafe extern "C" fn record_close(conn: u64, reason: *const c_char) {
    let reason = CStr::from_ptr(reason).to_string_lossy().into_owned();
    CLOSED.lock().unwrap().push((conn, reason));
}

fn open(ban: u64, after: u32, capacity: usize) -> CacheHandle {
    let mut h: CacheHandle = 0;
    assert_eq!(addrcache_open(ban, after, capacity, &mut h), ErrorCode::Success);
    assert_ne!(h, 0);
    h
}

fn c(s: &str) -> CString {
    CString::new(s).unwrap()
}

#[test]
fn add_check_flush_over_abi() {
    let h = open(300, 1, 0);
    assert_eq!(addrcache_add(h, c("192.0.2.10").as_ptr()), ErrorCode::Success);

    let mut hit = false;
    assert_eq!(addrcache_check(h, c("192.0.2.10").as_ptr(), 42, &mut hit), ErrorCode::Success);
    assert!(hit);
    assert_eq!(addrcache_check(h, c("192.0.2.11").as_ptr(), 43, &mut hit), ErrorCode::Success);
    assert!(!hit);

    let mut closed = 0u64;
    let rc = unsafe { addrcache_flush_pending(h, Some(record_close), &mut closed) };
    assert_eq!(rc, ErrorCode::Success);
    assert_eq!(closed, 1);
    assert!(CLOSED
        .lock()
        .unwrap()
        .contains(&(42, "*** Banned (cache)".to_string())));

    let mut len = 0u64;
    assert_eq!(addrcache_len(h, &mut len), ErrorCode::Success);
    assert_eq!(len, 1);
    assert_eq!(addrcache_close(h), ErrorCode::Success);
}

#[test]
fn remove_by_mask_and_flush() {
    let h = open(300, 1, 0);
    for a in ["10.1.0.1", "10.1.0.2", "10.2.0.1", "2001:db8::1"] {
        assert_eq!(addrcache_add(h, c(a).as_ptr()), ErrorCode::Success);
    }
    assert_eq!(addrcache_remove(h, c("10.1.0.0/16").as_ptr()), ErrorCode::Success);
    assert_eq!(addrcache_remove(h, c("10.1.0.0/16").as_ptr()), ErrorCode::NotFound);
    assert_eq!(addrcache_remove(h, c("not an address").as_ptr()), ErrorCode::InvalidPrefix);

    let mut len = 0u64;
    addrcache_len(h, &mut len);
    assert_eq!(len, 2);

    assert_eq!(addrcache_flush(h), ErrorCode::Success);
    addrcache_len(h, &mut len);
    assert_eq!(len, 0);

    let mut removed = 7u64;
    assert_eq!(addrcache_sweep(h, &mut removed), ErrorCode::Success);
    assert_eq!(removed, 0);
    assert_eq!(addrcache_close(h), ErrorCode::Success);
}

#[test]
fn mapped_spelling_removes_the_v4_entry() {
    let h = open(300, 1, 0);
    assert_eq!(addrcache_add(h, c("::ffff:192.0.2.7").as_ptr()), ErrorCode::Success);
    assert_eq!(addrcache_add(h, c("192.0.2.8").as_ptr()), ErrorCode::Success);

    assert_eq!(addrcache_remove(h, c("::ffff:192.0.2.7").as_ptr()), ErrorCode::Success);
    let mut len = 0u64;
    addrcache_len(h, &mut len);
    assert_eq!(len, 1);

    // a mapped mask covers the v4 range too
    assert_eq!(addrcache_remove(h, c("::ffff:192.0.2.0/120").as_ptr()), ErrorCode::Success);
    addrcache_len(h, &mut len);
    assert_eq!(len, 0);
    assert_eq!(addrcache_close(h), ErrorCode::Success);
}

#[test]
fn bad_input_reports_codes() {
    let h = open(300, 1, 0);
    assert_eq!(addrcache_add(h, c("300.1.1.1").as_ptr()), ErrorCode::InvalidPrefix);
    assert_eq!(addrcache_last_error(), ErrorCode::InvalidPrefix);
    assert_eq!(addrcache_add(h, std::ptr::null()), ErrorCode::Utf8Error);
    assert_eq!(addrcache_add(0, c("1.1.1.1").as_ptr()), ErrorCode::InvalidHandle);

    let mut hit = false;
    assert_eq!(
        addrcache_check(h, c("1.1.1.1").as_ptr(), 1, std::ptr::null_mut()),
        ErrorCode::InvalidHandle
    );
    assert_eq!(addrcache_check(h, c("1.1.1.1").as_ptr(), 1, &mut hit), ErrorCode::Success);
    assert_eq!(addrcache_last_error(), ErrorCode::Success);
    assert_eq!(
        unsafe { addrcache_flush_pending(h, None, std::ptr::null_mut()) },
        ErrorCode::InvalidHandle
    );

    assert_eq!(addrcache_close(h), ErrorCode::Success);
    assert_eq!(addrcache_close(h), ErrorCode::InvalidHandle);
    assert_eq!(addrcache_len(h, &mut 0u64), ErrorCode::InvalidHandle);
}

#[test]
fn capacity_exhaustion_over_abi() {
    let h = open(300, 1, 1);
    assert_eq!(addrcache_add(h, c("10.0.0.1").as_ptr()), ErrorCode::Success);
    assert_eq!(addrcache_add(h, c("10.0.0.2").as_ptr()), ErrorCode::CapacityExceeded);
    // the existing entry is still refreshed in place
    assert_eq!(addrcache_add(h, c("10.0.0.1").as_ptr()), ErrorCode::Success);
    assert_eq!(addrcache_close(h), ErrorCode::Success);
}

#[test]
fn disabled_cache_never_hits() {
    let h = open(0, 1, 0);
    assert_eq!(addrcache_add(h, c("10.0.0.1").as_ptr()), ErrorCode::Success);
    let mut hit = true;
    addrcache_check(h, c("10.0.0.1").as_ptr(), 9, &mut hit);
    assert!(!hit);
    assert_eq!(addrcache_close(h), ErrorCode::Success);
}

#[test]
fn strerror_is_nul_terminated() {
    for code in [
        ErrorCode::Success,
        ErrorCode::CapacityExceeded,
        ErrorCode::InvalidHandle,
        ErrorCode::NotFound,
        ErrorCode::Unknown,
    ] {
        let msg = unsafe { CStr::from_ptr(addrcache_strerror(code)) };
        assert_eq!(msg.to_str().unwrap(), code.as_str());
        assert!(!msg.to_bytes().is_empty());
    }
}

#[test]
fn opening_installs_the_logger_once() {
    let a = open(300, 1, 0);
    let b = open(300, 1, 0);
    assert!(log::max_level() >= log::LevelFilter::Error);
    assert_eq!(addrcache_close(a), ErrorCode::Success);
    assert_eq!(addrcache_close(b), ErrorCode::Success);
}

#[test]
fn open_rejects_null_out() {
    assert_eq!(
        addrcache_open(300, 1, 0, std::ptr::null_mut()),
        ErrorCode::InvalidHandle
    );
}
