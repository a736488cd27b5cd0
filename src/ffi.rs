//! FFI bindings for Cogbattery
//!
//! This module provides C-compatible functions for calling the engine from host
//! apps. All functions use C strings (null-terminated) and return allocated
//! memory that must be freed by the caller using `battery_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::games::{BatteryConfig, GameOutcome};
use crate::indices::priority_domain;
use crate::metrics::sampling_cycle_ms;
use crate::prescription::generate_plan;
use crate::report::ReportEncoder;
use crate::scoring::score_trials;
use crate::session::SessionOrchestrator;
use crate::signal::analyze_rt;
use crate::simulation::{run_simulated_session, ChildPreset, SimulatedChild};
use crate::store::InMemoryStore;
use crate::types::{Child, CognitiveIndices, Domain, GameId, Trial};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Read a required string argument, recording an error when it is missing
unsafe fn required_arg(ptr: *const c_char, name: &str) -> Option<String> {
    let value = cstr_to_string(ptr);
    if value.is_none() {
        set_last_error(&format!("Invalid {name} string pointer"));
    }
    value
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Serialize `value` into a newly allocated C string, or record the error
fn json_to_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Score one finished game given its outcome JSON; returns TaskResult JSON.
///
/// # Safety
/// - `outcome_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `battery_free_string`.
/// - Returns NULL on error; call `battery_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn battery_score_game(outcome_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(json) = required_arg(outcome_json, "outcome JSON") else {
        return ptr::null_mut();
    };

    let outcome: GameOutcome = match serde_json::from_str(&json) {
        Ok(o) => o,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    match crate::scoring::score_game(&outcome) {
        Ok(result) => json_to_cstr(&result),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Score a JSON array of trials recorded under the default configuration.
///
/// `game_id` is a game id such as `focus_flow`. Returns TaskResult JSON.
///
/// # Safety
/// - `game_id` and `trials_json` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `battery_free_string`.
/// - Returns NULL on error; call `battery_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn battery_analyze_game(
    game_id: *const c_char,
    trials_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(id) = required_arg(game_id, "game_id") else {
        return ptr::null_mut();
    };
    let Some(json) = required_arg(trials_json, "trials JSON") else {
        return ptr::null_mut();
    };

    let Some(game) = GameId::from_str_id(&id) else {
        set_last_error(&format!("Unknown game: {id}"));
        return ptr::null_mut();
    };

    let trials: Vec<Trial> = match serde_json::from_str(&json) {
        Ok(t) => t,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    // FocusFlow and StopAndGo cycles do not depend on the grade
    let cycle = sampling_cycle_ms(game, &trials, &BatteryConfig::for_grade(4));
    match score_trials(game, &trials, cycle) {
        Ok(result) => json_to_cstr(&result),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Spectral analysis of an RT series given as a JSON array of numbers or nulls.
///
/// # Safety
/// - `rt_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `battery_free_string`.
/// - Returns NULL on error; call `battery_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn battery_analyze_rt(rt_json: *const c_char, cycle_ms: f64) -> *mut c_char {
    clear_last_error();

    let Some(json) = required_arg(rt_json, "RT JSON") else {
        return ptr::null_mut();
    };

    let raw: Vec<Option<f64>> = match serde_json::from_str(&json) {
        Ok(r) => r,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    json_to_cstr(&analyze_rt(&raw, cycle_ms))
}

/// Priority domain label for a JSON object of the five indices.
///
/// # Safety
/// - `indices_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `battery_free_string`.
/// - Returns NULL on error; call `battery_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn battery_priority_domain(indices_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(json) = required_arg(indices_json, "indices JSON") else {
        return ptr::null_mut();
    };

    match serde_json::from_str::<CognitiveIndices>(&json) {
        Ok(indices) => string_to_cstr(priority_domain(&indices).label()),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Intervention plan JSON for a domain label or index name ("WME", "Working Memory").
///
/// # Safety
/// - `domain` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `battery_free_string`.
/// - Returns NULL on error; call `battery_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn battery_generate_plan(domain: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(label) = required_arg(domain, "domain") else {
        return ptr::null_mut();
    };

    match Domain::from_label(&label) {
        Some(d) => json_to_cstr(&generate_plan(d)),
        None => {
            set_last_error(&format!("Unknown domain: {label}"));
            ptr::null_mut()
        }
    }
}

/// Default battery configuration JSON for a school grade.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `battery_free_string`.
#[no_mangle]
pub unsafe extern "C" fn battery_default_config(grade: i32) -> *mut c_char {
    clear_last_error();
    json_to_cstr(&BatteryConfig::for_grade(grade.clamp(0, u8::MAX as i32) as u8))
}

// ============================================================================
// Stateful Session API
// ============================================================================

/// Opaque handle to a running session backed by an in-memory store
pub struct SessionHandle {
    orchestrator: SessionOrchestrator<InMemoryStore>,
    encoder: ReportEncoder,
}

/// Create and start a session.
///
/// # Safety
/// - `child_id` must be a valid null-terminated C string.
/// - `config_json` may be NULL to use the defaults for `grade`.
/// - Must be freed with `battery_session_free`.
/// - Returns NULL on error; call `battery_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn battery_session_new(
    child_id: *const c_char,
    grade: i32,
    config_json: *const c_char,
) -> *mut SessionHandle {
    clear_last_error();

    let Some(child_id) = required_arg(child_id, "child_id") else {
        return ptr::null_mut();
    };
    let grade = grade.clamp(0, u8::MAX as i32) as u8;

    let config = match cstr_to_string(config_json) {
        Some(json) => match BatteryConfig::from_json(&json) {
            Ok(c) => c,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        },
        None => BatteryConfig::for_grade(grade),
    };

    let mut orchestrator =
        SessionOrchestrator::new(InMemoryStore::new(), Child::new(child_id, grade), config);
    if let Err(e) = orchestrator.start() {
        set_last_error(&e.to_string());
        return ptr::null_mut();
    }

    Box::into_raw(Box::new(SessionHandle {
        orchestrator,
        encoder: ReportEncoder::new(),
    }))
}

/// Free a session.
///
/// # Safety
/// - `session` must be a valid pointer returned by `battery_session_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn battery_session_free(session: *mut SessionHandle) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

/// Battery position (1-5) of the next game, 0 when all games are done.
///
/// # Safety
/// - `session` must be a valid pointer returned by `battery_session_new`.
/// - Returns -1 on a NULL session.
#[no_mangle]
pub unsafe extern "C" fn battery_session_next_game(session: *const SessionHandle) -> i32 {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }

    let handle = &*session;
    handle
        .orchestrator
        .next_game()
        .map_or(0, |g| g.number() as i32)
}

/// Submit a finished game's outcome JSON; returns the TaskResult JSON.
///
/// # Safety
/// - `session` must be a valid pointer returned by `battery_session_new`.
/// - `outcome_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `battery_free_string`.
/// - Returns NULL on error; call `battery_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn battery_session_complete_game(
    session: *mut SessionHandle,
    outcome_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &mut *session;

    let Some(json) = required_arg(outcome_json, "outcome JSON") else {
        return ptr::null_mut();
    };

    let outcome: GameOutcome = match serde_json::from_str(&json) {
        Ok(o) => o,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    match handle.orchestrator.on_game_complete(outcome) {
        Ok(result) => json_to_cstr(&result),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Retry finalization after a failed save.
///
/// # Safety
/// - `session` must be a valid pointer returned by `battery_session_new`.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn battery_session_finalize(session: *mut SessionHandle) -> i32 {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }

    let handle = &mut *session;
    match handle.orchestrator.finalize() {
        Ok(_) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Play the remaining games with a simulated child (demo hosts and tests).
///
/// # Safety
/// - `session` must be a valid pointer returned by `battery_session_new`.
/// - `preset` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn battery_session_simulate(
    session: *mut SessionHandle,
    preset: *const c_char,
    seed: u64,
) -> i32 {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }

    let handle = &mut *session;

    let Some(preset) = required_arg(preset, "preset") else {
        return -1;
    };
    let preset: ChildPreset = match preset.parse() {
        Ok(p) => p,
        Err(e) => {
            set_last_error(&format!("{e}"));
            return -1;
        }
    };

    match run_simulated_session(&mut handle.orchestrator, SimulatedChild::preset(preset, seed)) {
        Ok(_) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Report document JSON for a finalized session.
///
/// # Safety
/// - `session` must be a valid pointer returned by `battery_session_new`.
/// - Returns a newly allocated string that must be freed with `battery_free_string`.
/// - Returns NULL on error; call `battery_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn battery_session_report(session: *const SessionHandle) -> *mut c_char {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &*session;
    match handle.encoder.encode_session(&handle.orchestrator) {
        Ok(doc) => json_to_cstr(&doc),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by battery functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a battery function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn battery_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next battery function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn battery_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the engine version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn battery_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
