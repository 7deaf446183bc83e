use crate::errors::ErrorCode;
use crate::reject::RejectCache;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle ID type - safer than raw pointers
pub type HandleId = u64;

/// Connection handles coming from C are opaque 64-bit ids (fd, client id, ...).
pub type AbiCache = RejectCache<u64>;

static HANDLES: Lazy<DashMap<HandleId, AbiCache>> = Lazy::new(DashMap::new);
// Start from 1, reserve 0 for null/invalid
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Register a new cache and return its handle ID
pub fn register_handle(cache: AbiCache) -> HandleId {
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    HANDLES.insert(id, cache);
    id
}

/// Run `f` with exclusive access to the cache behind `handle_id`.
/// Other handles stay usable from other threads meanwhile.
pub fn with_handle<T, F>(handle_id: HandleId, f: F) -> Result<T, ErrorCode>
where
    F: FnOnce(&mut AbiCache) -> T,
{
    if handle_id == 0 {
        return Err(ErrorCode::InvalidHandle);
    }
    match HANDLES.get_mut(&handle_id) {
        Some(mut cache) => Ok(f(cache.value_mut())),
        None => Err(ErrorCode::InvalidHandle),
    }
}

/// Unregister and drop a cache
pub fn unregister_handle(handle_id: HandleId) -> Result<(), ErrorCode> {
    if handle_id == 0 {
        return Err(ErrorCode::InvalidHandle);
    }
    HANDLES
        .remove(&handle_id)
        .map(|_| ())
        .ok_or(ErrorCode::InvalidHandle)
}
