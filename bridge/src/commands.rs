//! Timer command payload rendering.
//!
//! Operators describe commands in config as text, dash/colon/space separated
//! hex, or hex templates with `{name}` / `{name:02X}` placeholders
//! (`"AA-55-{level:02X}"`). Canonical payloads (BEEP, power-off) are supplied
//! by configuration, never hard-coded; this module only renders them.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{CommandSpec, InitCmd};
use crate::error::ConfigError;
use crate::transport::session::RenderedCmd;

/// Parse operator hex: `"AA-55-01"`, `"aa:55:01"`, `"AA 55 01"` or the
/// contiguous `"aa5501"` form.
pub fn parse_hex(s: &str) -> Result<Vec<u8>, ConfigError> {
    let normalized = s.trim().replace([' ', ',', '-'], ":");
    let mut out = Vec::new();
    for part in normalized.split(':').filter(|p| !p.is_empty()) {
        if part.len() > 2 {
            if part.len() % 2 != 0 {
                return Err(ConfigError::Invalid(format!("odd-length hex run {part:?} in {s:?}")));
            }
            let bytes = hex::decode(part)
                .map_err(|_| ConfigError::Invalid(format!("bad hex {part:?} in {s:?}")))?;
            out.extend(bytes);
        } else {
            let byte = u8::from_str_radix(part, 16)
                .map_err(|_| ConfigError::Invalid(format!("bad hex byte {part:?} in {s:?}")))?;
            out.push(byte);
        }
    }
    if out.is_empty() {
        return Err(ConfigError::Invalid(format!("empty hex payload {s:?}")));
    }
    Ok(out)
}

fn format_arg(value: i64, fmt: &str) -> Result<String, ConfigError> {
    let fmt = if fmt.is_empty() { "X" } else { fmt };
    let (width_spec, kind) = fmt.split_at(fmt.len() - 1);
    let zero_pad = width_spec.starts_with('0');
    let width: usize = if width_spec.is_empty() {
        0
    } else {
        width_spec
            .trim_start_matches('0')
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad template format {fmt:?}")))?
    };
    let rendered = match kind {
        "X" if zero_pad => format!("{value:0width$X}"),
        "X" => format!("{value:width$X}"),
        "x" if zero_pad => format!("{value:0width$x}"),
        "x" => format!("{value:width$x}"),
        "d" if zero_pad => format!("{value:0width$}"),
        "d" => format!("{value:width$}"),
        _ => return Err(ConfigError::Invalid(format!("bad template format {fmt:?}"))),
    };
    Ok(rendered)
}

/// Substitute `{key}` / `{key:fmt}` placeholders, then parse as hex.
pub fn render_hex_template(template: &str, args: &HashMap<String, i64>) -> Result<Vec<u8>, ConfigError> {
    let mut rendered = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '{' {
            rendered.push(c);
            continue;
        }
        let mut placeholder = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(c) => placeholder.push(c),
                None => {
                    return Err(ConfigError::Invalid(format!("unterminated placeholder in {template:?}")))
                }
            }
        }
        let (key, fmt) = match placeholder.split_once(':') {
            Some((k, f)) => (k, f),
            None => (placeholder.as_str(), ""),
        };
        let value = args
            .get(key)
            .copied()
            .ok_or_else(|| ConfigError::Invalid(format!("missing template key {key:?}")))?;
        rendered.push_str(&format_arg(value, fmt)?);
    }
    parse_hex(&rendered)
}

/// Render one named command to wire bytes.
pub fn render_command(spec: &CommandSpec, args: &HashMap<String, i64>) -> Result<Vec<u8>, ConfigError> {
    if let Some(text) = &spec.text {
        return Ok(text.as_bytes().to_vec());
    }
    if let Some(hex) = &spec.hex {
        return parse_hex(hex);
    }
    if let Some(tpl) = &spec.hex_template {
        return render_hex_template(tpl, args);
    }
    Err(ConfigError::Invalid("command has no text/hex/hex_template".into()))
}

/// Render the post-connect command list. Unrenderable entries are dropped
/// with a diagnostic rather than blocking the connection.
pub fn render_init_cmds(cmds: &[InitCmd]) -> Vec<RenderedCmd> {
    let mut out = Vec::new();
    for cmd in cmds {
        let payload = if let Some(text) = &cmd.text {
            Ok(text.as_bytes().to_vec())
        } else if let Some(hex) = &cmd.hex {
            parse_hex(hex)
        } else {
            Err(ConfigError::Invalid("init command has neither text nor hex".into()))
        };
        match payload {
            Ok(payload) => out.push(RenderedCmd {
                payload,
                delay: Duration::from_millis(cmd.delay_ms),
            }),
            Err(e) => tracing::warn!(error = %e, "skipping unrenderable init command"),
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
