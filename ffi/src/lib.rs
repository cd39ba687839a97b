//! C-ABI wrapper around `courier-core`.
//!
//! # Overview
//! Exposes the request pipeline through `extern "C"` functions so any
//! language with a C FFI can issue calls, flip connectivity and cancel by
//! tag. Results come back asynchronously through an `FfiListener`.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Configuration crosses as a TOML string and call fields as a flat JSON
//!   object, so the ABI stays small.
//! - Call functions return 0 when the call was handed to the pipeline and
//!   -1 when the arguments were rejected; no callback fires in that case.
//! - The C caller owns the `FfiCourier` handle and must release it with
//!   `courier_free`.

pub mod types;

use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use courier_core::{
    Courier, HttpMethod, NetworkState, RequestConfig, RequestParams, ResponseListener,
};
use serde_json::Value;
use tracing::warn;

use types::*;

const REJECTED: i32 = -1;

/// Borrow a C string as UTF-8. Null or invalid → `None`.
fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Turn a flat JSON object into call fields. Strings pass through; numbers
/// and booleans use their JSON text; null is skipped.
fn parse_params(json: Option<&str>, tag: Option<&str>) -> Result<RequestParams, String> {
    let mut params = RequestParams::new();
    if let Some(json) = json.filter(|s| !s.trim().is_empty()) {
        let value: Value = serde_json::from_str(json).map_err(|e| e.to_string())?;
        let Value::Object(map) = value else {
            return Err("params must be a JSON object".to_string());
        };
        for (key, value) in map {
            params = match value {
                Value::String(s) => params.field(key, s),
                Value::Number(n) => params.field(key, n),
                Value::Bool(b) => params.field(key, b),
                Value::Null => params,
                _ => return Err(format!("field `{key}` must be a scalar")),
            };
        }
    }
    if let Some(tag) = tag {
        params = params.tagged(tag);
    }
    Ok(params)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Create and initialize a courier.
///
/// `config_toml` may be null for the defaults. Returns null if the
/// configuration is invalid or the pipeline cannot start. The caller must
/// free the returned pointer with `courier_free`.
#[unsafe(no_mangle)]
pub extern "C" fn courier_new(config_toml: *const c_char) -> *mut FfiCourier {
    catch_unwind(AssertUnwindSafe(|| {
        let config = match str_arg(config_toml) {
            Some(toml) => RequestConfig::from_toml_str(toml),
            None if config_toml.is_null() => Ok(RequestConfig::default()),
            None => {
                warn!("config is not valid UTF-8");
                return std::ptr::null_mut();
            }
        };
        let network = Arc::new(NetworkState::new(true));
        let inner = Courier::new().with_connectivity(network.clone());
        match config.and_then(|config| inner.init(config)) {
            Ok(()) => Box::into_raw(Box::new(FfiCourier { inner, network })),
            Err(e) => {
                warn!(error = %e, "courier_new failed");
                std::ptr::null_mut()
            }
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Free a courier created by `courier_new`. Safe to call with null.
///
/// Calls still in flight are abandoned without delivery.
#[unsafe(no_mangle)]
pub extern "C" fn courier_free(client: *mut FfiCourier) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

/// Report connectivity changes from the host's network callbacks.
#[unsafe(no_mangle)]
pub extern "C" fn courier_set_online(client: *const FfiCourier, online: bool) {
    if client.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let client = unsafe { &*client };
        client.network.set_online(online);
    }));
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

fn submit(
    method: HttpMethod,
    client: *const FfiCourier,
    url: *const c_char,
    params_json: *const c_char,
    tag: *const c_char,
    listener: FfiListener,
) -> i32 {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return REJECTED;
        }
        let client = unsafe { &*client };
        let Some(url) = str_arg(url) else {
            return REJECTED;
        };
        let params = match parse_params(str_arg(params_json), str_arg(tag)) {
            Ok(params) => params,
            Err(e) => {
                warn!(url, error = %e, "rejected call params");
                return REJECTED;
            }
        };
        let listener: Arc<dyn ResponseListener> = Arc::new(CListener(listener));
        client.inner.submit(method, url, params, listener);
        0
    }))
    .unwrap_or(REJECTED)
}

/// Issue a GET. `params_json` and `tag` may be null.
#[unsafe(no_mangle)]
pub extern "C" fn courier_get(
    client: *const FfiCourier,
    url: *const c_char,
    params_json: *const c_char,
    tag: *const c_char,
    listener: FfiListener,
) -> i32 {
    submit(HttpMethod::Get, client, url, params_json, tag, listener)
}

#[unsafe(no_mangle)]
pub extern "C" fn courier_post(
    client: *const FfiCourier,
    url: *const c_char,
    params_json: *const c_char,
    tag: *const c_char,
    listener: FfiListener,
) -> i32 {
    submit(HttpMethod::Post, client, url, params_json, tag, listener)
}

#[unsafe(no_mangle)]
pub extern "C" fn courier_put(
    client: *const FfiCourier,
    url: *const c_char,
    params_json: *const c_char,
    tag: *const c_char,
    listener: FfiListener,
) -> i32 {
    submit(HttpMethod::Put, client, url, params_json, tag, listener)
}

#[unsafe(no_mangle)]
pub extern "C" fn courier_delete(
    client: *const FfiCourier,
    url: *const c_char,
    params_json: *const c_char,
    tag: *const c_char,
    listener: FfiListener,
) -> i32 {
    submit(HttpMethod::Delete, client, url, params_json, tag, listener)
}

/// Suppress delivery of in-flight calls whose tag starts with `tag`.
#[unsafe(no_mangle)]
pub extern "C" fn courier_cancel(client: *const FfiCourier, tag: *const c_char) {
    if client.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let client = unsafe { &*client };
        if let Some(tag) = str_arg(tag) {
            client.inner.cancel(tag);
        }
    }));
}

/// Add or replace a header sent with every later call. Returns 0 on
/// success, -1 for a null handle or an invalid header.
#[unsafe(no_mangle)]
pub extern "C" fn courier_set_default_header(
    client: *const FfiCourier,
    name: *const c_char,
    value: *const c_char,
) -> i32 {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return REJECTED;
        }
        let client = unsafe { &*client };
        let (Some(name), Some(value)) = (str_arg(name), str_arg(value)) else {
            return REJECTED;
        };
        match client.inner.set_default_header(name, value) {
            Ok(()) => 0,
            Err(e) => {
                warn!(name, error = %e, "rejected default header");
                REJECTED
            }
        }
    }))
    .unwrap_or(REJECTED)
}
