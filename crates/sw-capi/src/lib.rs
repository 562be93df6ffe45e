//! C ABI over the Skywalker engine.
//!
//! Handles are opaque pointers owned by this library. Every fallible call
//! returns a `#[repr(C)]` struct carrying its value, an error code (`0` on
//! success, see `ErrorCode`) and an error message that is null on success.
//! Strings handed out by this library are interned for the life of the
//! process, so callers never free them.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::slice;
use tracing::debug;

use sw_ensemble::{load_ensemble, Ensemble};
use sw_types::{invalid_value, ErrorCode, InputRecord, Outcome, OutputRecord, Settings, SwResult};

static STRINGS: Mutex<BTreeSet<CString>> = parking_lot::const_mutex(BTreeSet::new());

/// Returns a stable pointer to a process-lifetime copy of `text`.
fn intern(text: &str) -> *const c_char {
    let owned = CString::new(text.replace('\0', "\u{fffd}")).unwrap_or_default();
    let mut pool = STRINGS.lock();
    if let Some(existing) = pool.get(&owned) {
        return existing.as_ptr();
    }
    // The heap buffer does not move when the CString itself moves into the set.
    let ptr = owned.as_ptr();
    pool.insert(owned);
    ptr
}

fn message_ptr(message: Option<String>) -> *const c_char {
    message.as_deref().map_or(ptr::null(), intern)
}

/// Reads a caller-supplied C string.
///
/// # Safety
/// `ptr` must be null or point to a nul-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char, label: &str) -> SwResult<&'a str> {
    if ptr.is_null() {
        return Err(invalid_value!("{} pointer was null", label));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| invalid_value!("{} is not valid UTF-8", label))
}

/// # Safety
/// `ptr` must be null or point to a live `T` that outlives `'a`.
unsafe fn handle<'a, T>(ptr: *const T, label: &str) -> SwResult<&'a T> {
    ptr.as_ref()
        .ok_or_else(|| invalid_value!("{} pointer was null", label))
}

/// # Safety
/// `ptr` must be null or point to a live `T` that is not otherwise borrowed.
unsafe fn handle_mut<'a, T>(ptr: *mut T, label: &str) -> SwResult<&'a mut T> {
    ptr.as_mut()
        .ok_or_else(|| invalid_value!("{} pointer was null", label))
}

/// Result of `sw_load_ensemble`.
#[repr(C)]
pub struct SwEnsembleResult {
    /// Ensemble type (0 lattice, 1 enumeration, 2 mixed, 3 user); -1 on failure.
    pub ensemble_type: i32,
    /// Settings owned by the ensemble; valid until the ensemble is freed.
    pub settings: *const Settings,
    pub ensemble: *mut Ensemble,
    pub error_code: i32,
    pub error_message: *const c_char,
}

/// Result of a string-valued lookup.
#[repr(C)]
pub struct SwStringResult {
    pub value: *const c_char,
    pub error_code: i32,
    pub error_message: *const c_char,
}

#[repr(C)]
pub struct SwIntResult {
    pub value: i64,
    pub error_code: i32,
    pub error_message: *const c_char,
}

/// Result of a real-valued lookup. `value` is NaN on failure.
#[repr(C)]
pub struct SwRealResult {
    pub value: f64,
    pub error_code: i32,
    pub error_message: *const c_char,
}

/// Result of an array lookup. `values` points into the input record and is
/// valid until the ensemble is freed.
#[repr(C)]
pub struct SwArrayResult {
    pub values: *const f64,
    pub size: usize,
    pub error_code: i32,
    pub error_message: *const c_char,
}

/// Result of a call with no value (writes, output updates).
#[repr(C)]
pub struct SwStatus {
    pub error_code: i32,
    pub error_message: *const c_char,
}

fn code_of<T>(outcome: &Outcome<T>) -> i32 {
    outcome.error_code.as_i32()
}

impl From<SwResult<Ensemble>> for SwEnsembleResult {
    fn from(result: SwResult<Ensemble>) -> Self {
        let outcome = Outcome::from(result);
        let error_code = code_of(&outcome);
        match outcome.payload {
            Some(ensemble) => {
                let ensemble_type = ensemble.kind() as i32;
                // Points into the shared allocation, so boxing the ensemble keeps it valid.
                let settings = std::sync::Arc::as_ptr(ensemble.settings());
                Self {
                    ensemble_type,
                    settings,
                    ensemble: Box::into_raw(Box::new(ensemble)),
                    error_code,
                    error_message: ptr::null(),
                }
            }
            None => Self {
                ensemble_type: -1,
                settings: ptr::null(),
                ensemble: ptr::null_mut(),
                error_code,
                error_message: message_ptr(outcome.error_message),
            },
        }
    }
}

impl From<SwResult<&str>> for SwStringResult {
    fn from(result: SwResult<&str>) -> Self {
        let outcome = Outcome::from(result);
        Self {
            value: outcome.payload.map_or(ptr::null(), intern),
            error_code: code_of(&outcome),
            error_message: message_ptr(outcome.error_message),
        }
    }
}

impl From<SwResult<i64>> for SwIntResult {
    fn from(result: SwResult<i64>) -> Self {
        let outcome = Outcome::from(result);
        Self {
            value: outcome.payload.unwrap_or(0),
            error_code: code_of(&outcome),
            error_message: message_ptr(outcome.error_message),
        }
    }
}

impl From<SwResult<f64>> for SwRealResult {
    fn from(result: SwResult<f64>) -> Self {
        let outcome = Outcome::from(result);
        Self {
            value: outcome.payload.unwrap_or(f64::NAN),
            error_code: code_of(&outcome),
            error_message: message_ptr(outcome.error_message),
        }
    }
}

impl From<SwResult<&[f64]>> for SwArrayResult {
    fn from(result: SwResult<&[f64]>) -> Self {
        let outcome = Outcome::from(result);
        let (values, size) = outcome
            .payload
            .map_or((ptr::null(), 0), |values| (values.as_ptr(), values.len()));
        Self {
            values,
            size,
            error_code: code_of(&outcome),
            error_message: message_ptr(outcome.error_message),
        }
    }
}

impl From<SwResult<()>> for SwStatus {
    fn from(result: SwResult<()>) -> Self {
        let outcome = Outcome::from(result);
        Self {
            error_code: code_of(&outcome),
            error_message: message_ptr(outcome.error_message),
        }
    }
}

/// Prints the library banner to stderr.
#[no_mangle]
pub extern "C" fn sw_print_banner() {
    eprintln!("{}", sw_ensemble::banner());
}

/// Returns the constant name of an error code (e.g. `"PARAM_NOT_FOUND"`), or
/// null for unknown codes.
#[no_mangle]
pub extern "C" fn sw_error_name(code: i32) -> *const c_char {
    ErrorCode::from_i32(code).map_or(ptr::null(), |c| intern(c.name()))
}

/// Loads an ensemble from a YAML file. `settings_block` may be null, in which
/// case no settings are read.
///
/// # Safety
/// `filename` must be a valid C string; `settings_block` must be null or a
/// valid C string. A returned ensemble must be released with
/// `sw_ensemble_free`.
#[no_mangle]
pub unsafe extern "C" fn sw_load_ensemble(
    filename: *const c_char,
    settings_block: *const c_char,
) -> SwEnsembleResult {
    let load = || -> SwResult<Ensemble> {
        let filename = str_arg(filename, "filename")?;
        let settings_block = if settings_block.is_null() {
            None
        } else {
            Some(str_arg(settings_block, "settings_block")?)
        };
        debug!("C ABI load of {}", filename);
        Ok(load_ensemble(filename, settings_block)?.ensemble)
    };
    SwEnsembleResult::from(load())
}

/// # Safety
/// `settings` and `name` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_settings_has(settings: *const Settings, name: *const c_char) -> bool {
    match (handle(settings, "settings"), str_arg(name, "name")) {
        (Ok(settings), Ok(name)) => settings.has(name),
        _ => false,
    }
}

/// # Safety
/// `settings` and `name` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_settings_get(
    settings: *const Settings,
    name: *const c_char,
) -> SwStringResult {
    let get = || handle(settings, "settings")?.get(str_arg(name, "name")?);
    SwStringResult::from(get())
}

/// # Safety
/// `settings` and `name` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_settings_get_int(
    settings: *const Settings,
    name: *const c_char,
) -> SwIntResult {
    let get = || handle(settings, "settings")?.get_int(str_arg(name, "name")?);
    SwIntResult::from(get())
}

/// # Safety
/// `settings` and `name` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_settings_get_real(
    settings: *const Settings,
    name: *const c_char,
) -> SwRealResult {
    let get = || handle(settings, "settings")?.get_real(str_arg(name, "name")?);
    SwRealResult::from(get())
}

/// Number of members, or 0 for a null ensemble.
///
/// # Safety
/// `ensemble` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_ensemble_size(ensemble: *const Ensemble) -> usize {
    handle(ensemble, "ensemble").map_or(0, Ensemble::size)
}

/// Ensemble type code, or -1 for a null ensemble.
///
/// # Safety
/// `ensemble` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_ensemble_type(ensemble: *const Ensemble) -> i32 {
    handle(ensemble, "ensemble").map_or(-1, |e| e.kind() as i32)
}

/// Advances the cursor. On success stores the member's records in `input`
/// and `output` and returns true; returns false (storing nulls) once the
/// ensemble is exhausted. The cursor stays exhausted until
/// `sw_ensemble_reset`.
///
/// # Safety
/// `ensemble` must be null or valid; `input` and `output` must be null or
/// writable. The stored pointers are valid until the ensemble is freed.
#[no_mangle]
pub unsafe extern "C" fn sw_ensemble_next(
    ensemble: *mut Ensemble,
    input: *mut *const InputRecord,
    output: *mut *mut OutputRecord,
) -> bool {
    let next = handle_mut(ensemble, "ensemble")
        .ok()
        .and_then(|e| e.next_member())
        .map(|(i, o)| (i as *const InputRecord, o as *mut OutputRecord));
    let (input_ptr, output_ptr) = next.unwrap_or((ptr::null(), ptr::null_mut()));
    if !input.is_null() {
        *input = input_ptr;
    }
    if !output.is_null() {
        *output = output_ptr;
    }
    next.is_some()
}

/// Rewinds the cursor before the first member.
///
/// # Safety
/// `ensemble` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_ensemble_reset(ensemble: *mut Ensemble) {
    if let Ok(ensemble) = handle_mut(ensemble, "ensemble") {
        ensemble.reset();
    }
}

/// Writes inputs, outputs and settings as a Python module.
///
/// # Safety
/// `ensemble` and `filename` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_ensemble_write(
    ensemble: *const Ensemble,
    filename: *const c_char,
) -> SwStatus {
    let write = || handle(ensemble, "ensemble")?.write(str_arg(filename, "filename")?);
    SwStatus::from(write())
}

/// Releases an ensemble and everything it owns, including its settings.
///
/// # Safety
/// `ensemble` must be null or a pointer returned by `sw_load_ensemble` that
/// has not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn sw_ensemble_free(ensemble: *mut Ensemble) {
    if !ensemble.is_null() {
        drop(Box::from_raw(ensemble));
    }
}

/// # Safety
/// `input` and `name` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_input_has(input: *const InputRecord, name: *const c_char) -> bool {
    match (handle(input, "input"), str_arg(name, "name")) {
        (Ok(input), Ok(name)) => input.has(name),
        _ => false,
    }
}

/// # Safety
/// `input` and `name` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_input_get(input: *const InputRecord, name: *const c_char) -> SwRealResult {
    let get = || handle(input, "input")?.get(str_arg(name, "name")?);
    SwRealResult::from(get())
}

/// # Safety
/// `input` and `name` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_input_has_array(
    input: *const InputRecord,
    name: *const c_char,
) -> bool {
    match (handle(input, "input"), str_arg(name, "name")) {
        (Ok(input), Ok(name)) => input.has_array(name),
        _ => false,
    }
}

/// # Safety
/// `input` and `name` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_input_get_array(
    input: *const InputRecord,
    name: *const c_char,
) -> SwArrayResult {
    let get = || handle(input, "input")?.get_array(str_arg(name, "name")?);
    SwArrayResult::from(get())
}

/// Stores a scalar metric, replacing any earlier value under `name`.
///
/// # Safety
/// `output` and `name` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn sw_output_set(
    output: *mut OutputRecord,
    name: *const c_char,
    value: f64,
) -> SwStatus {
    let set = || -> SwResult<()> {
        let name = str_arg(name, "name")?;
        handle_mut(output, "output")?.set(name, value);
        Ok(())
    };
    SwStatus::from(set())
}

/// Stores an array metric of `size` values copied from `values`.
///
/// # Safety
/// `output` and `name` must be null or valid; `values` must point to `size`
/// readable reals (it may be null when `size` is 0).
#[no_mangle]
pub unsafe extern "C" fn sw_output_set_array(
    output: *mut OutputRecord,
    name: *const c_char,
    values: *const f64,
    size: usize,
) -> SwStatus {
    let set = || -> SwResult<()> {
        let name = str_arg(name, "name")?;
        let values = match (values.is_null(), size) {
            (_, 0) => &[][..],
            (true, _) => return Err(invalid_value!("values pointer was null")),
            (false, _) => slice::from_raw_parts(values, size),
        };
        handle_mut(output, "output")?.set_array(name, values);
        Ok(())
    };
    SwStatus::from(set())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
settings:
  param1: hello
  param2: 81
  param3: 3.14159265357
input:
  fixed:
    p1: 1
    shape: [1, 2, 3]
  lattice:
    tick: {min: 0, max: 10, count: 11}
"#;

    fn c(text: &str) -> CString {
        CString::new(text).unwrap()
    }

    fn text(ptr: *const c_char) -> String {
        assert!(!ptr.is_null());
        unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string()
    }

    fn fixture() -> (tempfile::NamedTempFile, CString) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let path = c(file.path().to_str().unwrap());
        (file, path)
    }

    #[test]
    fn load_iterate_and_write() {
        let (_file, path) = fixture();
        let settings_block = c("settings");
        let (param1, param2, param3) = (c("param1"), c("param2"), c("param3"));
        let (tick, qoi, shape, pair) = (c("tick"), c("qoi"), c("shape"), c("pair"));

        let result = unsafe { sw_load_ensemble(path.as_ptr(), settings_block.as_ptr()) };
        assert_eq!(result.error_code, 0);
        assert!(result.error_message.is_null());
        assert_eq!(result.ensemble_type, 0);
        let ensemble = result.ensemble;

        unsafe {
            assert_eq!(sw_ensemble_size(ensemble), 11);
            assert_eq!(sw_ensemble_type(ensemble), 0);

            let setting = sw_settings_get(result.settings, param1.as_ptr());
            assert_eq!(setting.error_code, 0);
            assert_eq!(text(setting.value), "hello");
            assert_eq!(sw_settings_get_int(result.settings, param2.as_ptr()).value, 81);
            let real = sw_settings_get_real(result.settings, param3.as_ptr());
            assert!((real.value - 3.14159265357).abs() < 1e-14);
            assert!(sw_settings_has(result.settings, param1.as_ptr()));

            let mut input: *const InputRecord = ptr::null();
            let mut output: *mut OutputRecord = ptr::null_mut();
            let mut count = 0;
            while sw_ensemble_next(ensemble, &mut input, &mut output) {
                assert!(sw_input_has(input, tick.as_ptr()));
                let value = sw_input_get(input, tick.as_ptr());
                assert_eq!(value.error_code, 0);
                assert_eq!(value.value, count as f64);

                assert!(sw_input_has_array(input, shape.as_ptr()));
                let array = sw_input_get_array(input, shape.as_ptr());
                assert_eq!(array.error_code, 0);
                assert_eq!(slice::from_raw_parts(array.values, array.size), &[1.0, 2.0, 3.0]);

                assert_eq!(sw_output_set(output, qoi.as_ptr(), 4.0).error_code, 0);
                let values = [value.value, -value.value];
                let status = sw_output_set_array(output, pair.as_ptr(), values.as_ptr(), 2);
                assert_eq!(status.error_code, 0);
                count += 1;
            }
            assert_eq!(count, 11);
            assert!(input.is_null());
            assert!(!sw_ensemble_next(ensemble, &mut input, &mut output));

            sw_ensemble_reset(ensemble);
            assert!(sw_ensemble_next(ensemble, &mut input, &mut output));

            let dir = tempfile::tempdir().unwrap();
            let out_path = dir.path().join("out.py");
            let out = c(out_path.to_str().unwrap());
            let status = sw_ensemble_write(ensemble, out.as_ptr());
            assert_eq!(status.error_code, 0);
            let written = std::fs::read_to_string(&out_path).unwrap();
            assert!(written.contains("output.qoi = [4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4]"));
            assert!(written.contains("output.pair = [[0, -0], [1, -1]"));

            sw_ensemble_free(ensemble);
        }
    }

    #[test]
    fn lookup_errors_carry_codes_and_messages() {
        let (_file, path) = fixture();
        let settings_block = c("settings");
        let (missing_setting, param1, nonexistent) =
            (c("nonexistent_setting"), c("param1"), c("nonexistent"));

        let result = unsafe { sw_load_ensemble(path.as_ptr(), settings_block.as_ptr()) };
        let ensemble = result.ensemble;
        unsafe {
            let missing = sw_settings_get(result.settings, missing_setting.as_ptr());
            assert_eq!(missing.error_code, ErrorCode::ParamNotFound.as_i32());
            assert!(missing.value.is_null());
            assert!(!text(missing.error_message).is_empty());

            let mismatch = sw_settings_get_real(result.settings, param1.as_ptr());
            assert_eq!(mismatch.error_code, ErrorCode::InvalidValue.as_i32());

            let mut input: *const InputRecord = ptr::null();
            assert!(sw_ensemble_next(ensemble, &mut input, ptr::null_mut()));
            let missing = sw_input_get(input, nonexistent.as_ptr());
            assert_eq!(missing.error_code, ErrorCode::ParamNotFound.as_i32());
            assert!(missing.value.is_nan());
            assert!(!sw_input_has(input, nonexistent.as_ptr()));

            let null_name = sw_input_get(input, ptr::null());
            assert_eq!(null_name.error_code, ErrorCode::InvalidValue.as_i32());

            sw_ensemble_free(ensemble);
        }
    }

    #[test]
    fn load_failures() {
        let dir = tempfile::tempdir().unwrap();
        let missing = c(dir.path().join("nope.yaml").to_str().unwrap());
        let result = unsafe { sw_load_ensemble(missing.as_ptr(), ptr::null()) };
        assert_eq!(result.error_code, ErrorCode::FileNotFound.as_i32());
        assert!(result.ensemble.is_null());
        assert!(result.settings.is_null());
        assert_eq!(result.ensemble_type, -1);
        assert!(!text(result.error_message).is_empty());

        let (_file, path) = fixture();
        let block = c("nope");
        let result = unsafe { sw_load_ensemble(path.as_ptr(), block.as_ptr()) };
        assert_eq!(result.error_code, ErrorCode::SettingsNotFound.as_i32());
    }

    #[test]
    fn null_handles_are_tolerated() {
        let name = c("x");
        unsafe {
            assert_eq!(sw_ensemble_size(ptr::null()), 0);
            assert_eq!(sw_ensemble_type(ptr::null()), -1);
            assert!(!sw_ensemble_next(ptr::null_mut(), ptr::null_mut(), ptr::null_mut()));
            sw_ensemble_reset(ptr::null_mut());
            sw_ensemble_free(ptr::null_mut());
            let status = sw_output_set(ptr::null_mut(), name.as_ptr(), 1.0);
            assert_eq!(status.error_code, ErrorCode::InvalidValue.as_i32());
        }
    }

    #[test]
    fn interned_strings_are_shared() {
        let a = intern("PARAM_NOT_FOUND");
        let b = intern("PARAM_NOT_FOUND");
        assert_eq!(a, b);
        assert_eq!(text(sw_error_name(4)), "PARAM_NOT_FOUND");
        assert!(sw_error_name(99).is_null());
    }
}
