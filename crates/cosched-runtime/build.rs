//! Generates `OUT_DIR/cos_merged_config.rs`.
//!
//! The library defaults below can be overridden at build time by pointing
//! `COS_CONFIG_RS` at a file of `pub const NAME: TYPE = VALUE;` lines.
//! `COS_*` environment variables read at runtime win over both.

use std::collections::BTreeMap;
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// (name, type, default)
const PARAMS: &[(&str, &str, &str)] = &[
    ("MAX_COROUTINES", "usize", "1024"),
    ("STACK_SIZE", "usize", "128 * 1024"),
    // 0 = one node per coroutine
    ("TIMER_NODES", "usize", "0"),
    // 0 = MAX_COROUTINES + reserved descriptors
    ("MAX_FDS", "usize", "0"),
    ("IDLE_WAIT_MS", "u64", "10_000"),
    ("CONNECT_TIMEOUT_MS", "u64", "10_000"),
    ("ACCEPT_TIMEOUT_MS", "u64", "3_000"),
    ("READ_TIMEOUT_MS", "u64", "10_000"),
    ("WRITE_TIMEOUT_MS", "u64", "10_000"),
    ("KEEPALIVE_SECS", "u32", "60"),
    ("DEBUG_LOGGING", "bool", "false"),
];

/// One `pub const` override from the user file.
#[derive(Debug, PartialEq)]
struct Override<'a> {
    name: &'a str,
    ty: &'a str,
    value: &'a str,
}

fn main() {
    println!("cargo:rerun-if-env-changed=COS_CONFIG_RS");

    let mut values: BTreeMap<&str, String> = BTreeMap::new();
    let source = env::var("COS_CONFIG_RS").ok();

    if let Some(path) = &source {
        println!("cargo:rerun-if-changed={}", path);
        match fs::read_to_string(path) {
            Ok(content) => {
                for warning in merge(&content, &mut values) {
                    println!("cargo:warning={}", warning);
                }
            }
            Err(e) => println!("cargo:warning=cannot read COS_CONFIG_RS {}: {}", path, e),
        }
    }

    let out_dir = env::var("OUT_DIR").unwrap_or_else(|e| panic!("OUT_DIR: {}", e));
    let dest = Path::new(&out_dir).join("cos_merged_config.rs");
    let rendered = render(&values, source.as_deref());
    if let Err(e) = fs::write(&dest, rendered) {
        panic!("writing {}: {}", dest.display(), e);
    }
}

/// `pub const NAME: TYPE = VALUE;` with the trailing semicolon optional.
fn parse_line(line: &str) -> Option<Override<'_>> {
    let rest = line.trim().strip_prefix("pub const ")?;
    let (name, rest) = rest.split_once(':')?;
    let (ty, value) = rest.split_once('=')?;
    let value = value.trim().trim_end_matches(';').trim();
    if value.is_empty() {
        return None;
    }
    Some(Override { name: name.trim(), ty: ty.trim(), value })
}

/// Apply overrides to `values`; returns one warning per rejected line.
fn merge(content: &str, values: &mut BTreeMap<&'static str, String>) -> Vec<String> {
    let mut warnings = Vec::new();
    for line in content.lines().filter(|l| l.trim_start().starts_with("pub const ")) {
        let Some(o) = parse_line(line) else {
            warnings.push(format!("malformed config line: {}", line.trim()));
            continue;
        };
        match PARAMS.iter().find(|(name, _, _)| *name == o.name) {
            Some((name, ty, _)) if *ty == o.ty => {
                values.insert(*name, o.value.to_string());
            }
            Some((name, ty, _)) => {
                warnings.push(format!("{} must be {}, not {}", name, ty, o.ty));
            }
            None => warnings.push(format!("unknown config parameter {}", o.name)),
        }
    }
    warnings
}

fn render(values: &BTreeMap<&str, String>, source: Option<&str>) -> String {
    let mut out = String::from("// Generated by cosched-runtime/build.rs\n");
    if let Some(path) = source {
        let _ = writeln!(out, "// Overrides from {}", path);
    }
    for (name, ty, default) in PARAMS {
        let value = values.get(name).map(String::as_str).unwrap_or(*default);
        let _ = writeln!(out, "pub const {}: {} = {};", name, ty, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("pub const STACK_SIZE: usize = 256 * 1024;"),
            Some(Override { name: "STACK_SIZE", ty: "usize", value: "256 * 1024" })
        );
        assert_eq!(
            parse_line("  pub const DEBUG_LOGGING: bool = true"),
            Some(Override { name: "DEBUG_LOGGING", ty: "bool", value: "true" })
        );
        assert_eq!(parse_line("pub const BROKEN"), None);
        assert_eq!(parse_line("pub const EMPTY: u64 = ;"), None);
    }

    #[test]
    fn test_merge_overrides_and_rejects() {
        let mut values = BTreeMap::new();
        let user = r#"
            // Tighter limits for a small box
            pub const MAX_COROUTINES: usize = 256;
            pub const READ_TIMEOUT_MS: u64 = 2_000;
            pub const KEEPALIVE_SECS: u64 = 30;
            pub const NOT_A_PARAM: u64 = 1;
        "#;

        let warnings = merge(user, &mut values);

        assert_eq!(values.get("MAX_COROUTINES").map(String::as_str), Some("256"));
        assert_eq!(values.get("READ_TIMEOUT_MS").map(String::as_str), Some("2_000"));
        assert!(!values.contains_key("KEEPALIVE_SECS"));
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_render_falls_back_to_defaults() {
        let mut values = BTreeMap::new();
        values.insert("MAX_COROUTINES", "64".to_string());
        let out = render(&values, None);

        assert!(out.contains("pub const MAX_COROUTINES: usize = 64;\n"));
        assert!(out.contains("pub const ACCEPT_TIMEOUT_MS: u64 = 3_000;\n"));
        assert_eq!(out.lines().filter(|l| l.starts_with("pub const")).count(), PARAMS.len());
    }
}
