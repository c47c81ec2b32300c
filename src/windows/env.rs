//! Environment handling for Windows process creation
//!
//! `CreateProcessW` takes the child environment as one UTF-16 block of
//! `KEY=VALUE\0` strings closed by an extra `\0`. Keys are case-insensitive
//! on Windows, so the list is deduplicated before it is serialized.
//!
//! Everything here is plain data manipulation and builds on every platform.

use std::collections::HashMap;
use std::io;

use crate::error::{Error, Result};

/// Variable the loader needs; injected when the caller's list lacks it
pub const SYSTEM_ROOT: &str = "SYSTEMROOT";

/// The current process environment as `KEY=VALUE` entries
pub fn environ() -> Vec<String> {
    std::env::vars_os()
        .map(|(k, v)| format!("{}={}", k.to_string_lossy(), v.to_string_lossy()))
        .collect()
}

/// Index of the `=` separating key and value.
///
/// The search skips the first byte so hidden per-drive variables such as
/// `=C:=C:\work` keep `=C:` as their key. `=` is ASCII, so the byte index
/// is always a char boundary.
fn key_end(kv: &str) -> Option<usize> {
    kv.bytes().skip(1).position(|b| b == b'=').map(|i| i + 1)
}

/// Remove duplicate keys, keeping each key's first position and its last value.
///
/// Entries without `=` pass through untouched. With `case_insensitive` the
/// keys `PATH` and `Path` are the same variable.
pub fn dedup_env_case(case_insensitive: bool, env: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(env.len());
    let mut saw: HashMap<String, usize> = HashMap::with_capacity(env.len());
    for kv in env {
        let Some(eq) = key_end(kv) else {
            out.push(kv.clone());
            continue;
        };
        let key = if case_insensitive {
            kv[..eq].to_lowercase()
        } else {
            kv[..eq].to_string()
        };
        match saw.get(&key) {
            Some(&slot) => out[slot] = kv.clone(),
            None => {
                saw.insert(key, out.len());
                out.push(kv.clone());
            }
        }
    }
    out
}

/// Append `SYSTEMROOT` from the current process if `env` does not set it
pub fn add_critical_env(env: Vec<String>) -> Vec<String> {
    add_critical_env_with(env, |key| {
        std::env::var_os(key).map(|v| v.to_string_lossy().into_owned())
    })
}

/// `add_critical_env` with an explicit lookup for the injected value
pub fn add_critical_env_with<F>(mut env: Vec<String>, lookup: F) -> Vec<String>
where
    F: FnOnce(&str) -> Option<String>,
{
    let present = env.iter().any(|kv| match key_end(kv) {
        Some(eq) => kv[..eq].eq_ignore_ascii_case(SYSTEM_ROOT),
        None => false,
    });
    if !present {
        let value = lookup(SYSTEM_ROOT).unwrap_or_default();
        env.push(format!("{}={}", SYSTEM_ROOT, value));
    }
    env
}

/// Serialize `env` into a UTF-16 environment block.
///
/// Each entry is followed by a NUL and the block by one more. An empty
/// environment still needs both terminators. An entry holding a NUL would
/// split into two, so it is rejected.
pub fn create_env_block(env: &[String]) -> Result<Vec<u16>> {
    if env.is_empty() {
        return Ok(vec![0, 0]);
    }
    let mut block = Vec::with_capacity(env.iter().map(|kv| kv.len() + 1).sum::<usize>() + 1);
    for kv in env {
        if kv.contains('\0') {
            return Err(Error::Spawn(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("environment entry contains a NUL: {:?}", kv),
            )));
        }
        block.extend(kv.encode_utf16());
        block.push(0);
    }
    block.push(0);
    Ok(block)
}

/// Split a UTF-16 environment block back into entries.
///
/// Reading stops at the first empty string, which terminates the block.
pub fn parse_env_block(block: &[u16]) -> Vec<String> {
    block
        .split(|&c| c == 0)
        .take_while(|entry| !entry.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}
