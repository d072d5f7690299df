//! C ABI exposed to the managed host.
//!
//! Every entry point works on the process-wide context installed through
//! [`crate::context::install`]. Misuse that indicates corrupted host state
//! (disposing a handle that was never issued, calling in without a context)
//! aborts the process: unwinding across this boundary is not allowed, and the
//! host cannot meaningfully continue.

use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::sync::Arc;

use log::{error, warn};

use crate::blocking::Outcome;
use crate::context::{self, PlatformContext};
use crate::handles::Handle;

fn require_context(call: &str) -> Arc<PlatformContext> {
    match context::current() {
        Some(context) => context,
        None => {
            error!("{call} called without an installed platform context");
            std::process::abort();
        }
    }
}

/// Releases the native object behind `handle`. Aborts on an unknown handle.
#[no_mangle]
pub extern "C" fn pb_handle_release(handle: u64) {
    let context = require_context("pb_handle_release");
    if let Err(err) = context.handles().release(Handle::from_raw(handle)) {
        error!("pb_handle_release: {err}");
        std::process::abort();
    }
}

#[no_mangle]
pub extern "C" fn pb_handle_is_live(handle: u64) -> bool {
    context::current()
        .map(|context| context.handles().contains(Handle::from_raw(handle)))
        .unwrap_or(false)
}

/// Downloads `url` to a temporary file and returns its path as a string the
/// caller frees with [`pb_string_free`].
///
/// Returns null when the transfer was cancelled or failed; `temporary` is
/// only written on success.
///
/// # Safety
///
/// `url` must be a valid NUL-terminated string. `temporary` must be null or
/// point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn pb_download_url_to_temp_file(
    url: *const c_char,
    temporary: *mut bool,
) -> *mut c_char {
    if url.is_null() {
        warn!("pb_download_url_to_temp_file called with a null url");
        return ptr::null_mut();
    }
    // SAFETY: caller guarantees a valid NUL-terminated string.
    let url = match unsafe { CStr::from_ptr(url) }.to_str() {
        Ok(url) => url,
        Err(err) => {
            warn!("pb_download_url_to_temp_file: url is not UTF-8: {err}");
            return ptr::null_mut();
        }
    };
    let context = require_context("pb_download_url_to_temp_file");
    let file = match context.gateway().download_url_to_temp_file(url) {
        Ok(Outcome::Ready(file)) => file,
        Ok(Outcome::Cancelled) => return ptr::null_mut(),
        Err(err) => {
            warn!("download of {url} failed: {err}");
            return ptr::null_mut();
        }
    };
    let Some(path) = file.path.to_str().and_then(|p| CString::new(p).ok()) else {
        warn!("downloaded path {} cannot cross the boundary", file.path.display());
        return ptr::null_mut();
    };
    if !temporary.is_null() {
        // SAFETY: non-null and writable per the contract above.
        unsafe { *temporary = file.temporary };
    }
    path.into_raw()
}

/// Frees a string returned by this library.
///
/// # Safety
///
/// `value` must be null or a pointer previously returned by this library and
/// not yet freed.
#[no_mangle]
pub unsafe extern "C" fn pb_string_free(value: *mut c_char) {
    if !value.is_null() {
        // SAFETY: the pointer came from CString::into_raw.
        drop(unsafe { CString::from_raw(value) });
    }
}

/// Tears down the process-wide context. Safe to call when none is installed.
#[no_mangle]
pub extern "C" fn pb_release_process_state() {
    if !context::shutdown() {
        warn!("pb_release_process_state called without an installed context");
    }
}
