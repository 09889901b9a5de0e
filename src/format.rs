//! Text rendering for the decode trace: dual decimal/hex integers, `%g` floats and escaped chars.

use crate::value::Scalar;

/// Two spaces per nesting level.
pub fn indent(depth: usize) -> String {
    " ".repeat(depth * 2)
}

/// Render one decoded scalar the way it appears after `name = `.
pub fn format_scalar(v: &Scalar) -> String {
    match v {
        Scalar::Unsigned { value, bits } => format_int(&value.to_string(), *value, *bits),
        Scalar::Signed { value, bits } => format_int(&value.to_string(), *value as u64, *bits),
        Scalar::Float(f) => format_g(*f as f64),
        Scalar::Double(d) => format_g(*d),
        Scalar::Text(units) => format!("'{}'", escape_units(units)),
    }
}

/// `{decimal} (0x{hex})`, hex zero-padded to the field width and masked to it.
fn format_int(decimal: &str, raw: u64, bits: u32) -> String {
    let digits = bits.div_ceil(4).max(1) as usize;
    let masked = if bits >= 64 { raw } else { raw & ((1u64 << bits) - 1) };
    format!("{} (0x{:0width$x})", decimal, masked, width = digits)
}

/// Printable ASCII passes through; `\r \n \t` use C escapes, everything else `\x{hex}`.
pub fn escape_units(units: &[u32]) -> String {
    let mut out = String::with_capacity(units.len());
    for &u in units {
        match u {
            0x0d => out.push_str("\\r"),
            0x0a => out.push_str("\\n"),
            0x09 => out.push_str("\\t"),
            0x20..=0x7e => out.push(u as u8 as char),
            _ => out.push_str(&format!("\\x{:x}", u)),
        }
    }
    out
}

/// C `printf("%g")`: six significant digits, shortest of fixed or exponent form,
/// trailing zeros removed.
pub fn format_g(v: f64) -> String {
    if v.is_nan() {
        return "nan".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0".into() } else { "0".into() };
    }
    let sci = format!("{:.5e}", v);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if !(-4..6).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let decimals = (5 - exp) as usize;
        trim_fraction(&format!("{:.*}", decimals, v)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
