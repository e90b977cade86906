//! C ABI entry points.
//!
//! Hosts (e.g. an Android app through a thin JNI shim) call
//! [`allergen_infer`] with two NUL-terminated strings and receive a heap
//! string in the boundary format, which they must hand back to
//! [`allergen_string_free`]. Nothing unwinds across this boundary: every
//! failure, including a panic, comes back as `ERROR|<reason>`.
//!
//! Calls are serialized; the engine is initialized on first use and the
//! configuration is read once from `ALLERGEN_BRIDGE_CONFIG` (defaults if unset).

use std::ffi::{c_char, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{error, warn};

use crate::bridge::BridgeResponse;
use crate::config::Config;
use crate::inference::runner::{InferenceRequest, InferenceRunner};
use crate::inference::DefaultBackend;

pub const CONFIG_ENV: &str = "ALLERGEN_BRIDGE_CONFIG";

static RUNNER: OnceLock<InferenceRunner<DefaultBackend>> = OnceLock::new();
static GATE: Mutex<()> = Mutex::new(());

fn load_config() -> Config {
    let Ok(path) = std::env::var(CONFIG_ENV) else {
        return Config::default();
    };
    Config::load(Path::new(&path)).unwrap_or_else(|e| {
        warn!(path = %path, "Ignoring bridge config: {e}");
        Config::default()
    })
}

fn default_runner() -> &'static InferenceRunner<DefaultBackend> {
    RUNNER.get_or_init(|| InferenceRunner::new(DefaultBackend::default(), Arc::new(load_config())))
}

/// Safe entry used by the C ABI: run one request on the process-wide runner.
pub fn infer_allergens(prompt: &str, model_path: &str) -> String {
    let _guard = GATE.lock().unwrap_or_else(PoisonError::into_inner);
    default_runner()
        .respond(&InferenceRequest::new(prompt, model_path))
        .to_string()
}

unsafe fn read_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn into_c_string(s: String) -> *mut c_char {
    let c = CString::new(s).unwrap_or_else(|e| {
        let mut bytes = e.into_vec();
        bytes.retain(|&b| b != 0);
        CString::new(bytes).unwrap_or_default()
    });
    c.into_raw()
}

/// Run single-turn allergen inference.
///
/// Returns a newly allocated string; release it with [`allergen_string_free`].
///
/// # Safety
///
/// `prompt` and `model_path` must each be null or point to a valid
/// NUL-terminated string that stays alive for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn allergen_infer(
    prompt: *const c_char,
    model_path: *const c_char,
) -> *mut c_char {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        match (read_arg(prompt), read_arg(model_path)) {
            (Some(prompt), Some(path)) => infer_allergens(prompt, path),
            _ => BridgeResponse::failure("Invalid Argument").to_string(),
        }
    }));
    let out = outcome.unwrap_or_else(|_| {
        error!("Panic inside allergen_infer");
        BridgeResponse::failure("Internal Panic").to_string()
    });
    into_c_string(out)
}

/// Free a string returned by [`allergen_infer`].
///
/// # Safety
///
/// `s` must be null or a pointer obtained from [`allergen_infer`] that has
/// not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn allergen_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
