//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! The C side hands in a listener made of two function pointers and an
//! opaque `user_data`; the Rust side calls back with a borrowed
//! `FfiResponse` whose strings are only valid for the duration of the
//! callback. Conversion helpers live here to keep `lib.rs` focused on the
//! `extern "C"` surface.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use courier_core::{Courier, Envelope, NetworkState, Origin, ResponseListener};

/// Opaque handle to a `Courier`. C callers receive a pointer to this and
/// pass it back into every FFI function.
pub struct FfiCourier {
    pub(crate) inner: Courier,
    pub(crate) network: Arc<NetworkState>,
}

/// Outcome of one call, borrowed for the duration of a callback.
///
/// `error` is null when the call succeeded; otherwise it holds the transport
/// error text or `"HTTP <code>"`.
#[repr(C)]
pub struct FfiResponse {
    pub url: *const c_char,
    pub status: i32,
    pub body: *const c_char,
    pub from_cache: bool,
    pub error: *const c_char,
}

/// Callback invoked on the completion thread.
pub type FfiCallback = extern "C" fn(user_data: *mut c_void, response: *const FfiResponse);

/// A listener supplied by C code. Either callback may be null.
///
/// `user_data` is passed back untouched and must be safe to use from the
/// completion thread.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiListener {
    pub user_data: *mut c_void,
    pub on_success: Option<FfiCallback>,
    pub on_failure: Option<FfiCallback>,
}

pub(crate) struct CListener(pub(crate) FfiListener);

// The C caller guarantees `user_data` may be used from the completion thread.
unsafe impl Send for CListener {}
unsafe impl Sync for CListener {}

/// Owned C strings backing one `FfiResponse`.
struct Strings {
    url: CString,
    body: CString,
    error: Option<CString>,
}

pub(crate) fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

impl CListener {
    fn call(&self, callback: Option<FfiCallback>, envelope: &Envelope) {
        let Some(callback) = callback else {
            return;
        };
        let strings = Strings {
            url: c_string(&envelope.url),
            body: c_string(&envelope.body),
            error: (!envelope.status.is_success()).then(|| c_string(&envelope.message())),
        };
        let response = FfiResponse {
            url: strings.url.as_ptr(),
            status: envelope.code(),
            body: strings.body.as_ptr(),
            from_cache: envelope.origin == Origin::Cache,
            error: strings
                .error
                .as_ref()
                .map_or(std::ptr::null(), |e| e.as_ptr()),
        };
        callback(self.0.user_data, &response);
    }
}

impl ResponseListener for CListener {
    fn on_success(&self, envelope: &Envelope) {
        self.call(self.0.on_success, envelope);
    }

    fn on_failure(&self, envelope: &Envelope) {
        self.call(self.0.on_failure, envelope);
    }
}
