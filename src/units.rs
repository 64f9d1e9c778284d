//! Human-readable unit strings: byte quantities, bit rates, and time spans.
//! The CLI value parsers and the perf formatter are the only consumers.

use crate::fail::Fail;

const KIB: u64 = 1024;
const KB: u64 = 1000;

fn split_magnitude(s: &str) -> Result<(u64, &str), Fail> {
    let s = s.trim();
    let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return Err(Fail::Invalid { details: "expected a leading number" });
    }
    let value = s[..digits]
        .parse::<u64>()
        .map_err(|_| Fail::Invalid { details: "number out of range" })?;
    Ok((value, s[digits..].trim()))
}

/// Parses a byte quantity: bare bytes, SI suffixes (`kB`, `MB`, `GB`, `TB`,
/// decimal) or IEC suffixes (`KiB`, `MiB`, `GiB`, `TiB`, binary). A lone
/// `K`/`M`/`G`/`T` reads as the SI form.
pub fn parse_bytes(s: &str) -> Result<u64, Fail> {
    let (value, suffix) = split_magnitude(s)?;
    let mult = match suffix {
        "" | "B" => 1,
        "k" | "K" | "kB" | "KB" => KB,
        "M" | "MB" => KB * KB,
        "G" | "GB" => KB * KB * KB,
        "T" | "TB" => KB * KB * KB * KB,
        "Ki" | "KiB" => KIB,
        "Mi" | "MiB" => KIB * KIB,
        "Gi" | "GiB" => KIB * KIB * KIB,
        "Ti" | "TiB" => KIB * KIB * KIB * KIB,
        _ => return Err(Fail::Invalid { details: "unknown byte suffix" }),
    };
    value
        .checked_mul(mult)
        .ok_or(Fail::Invalid { details: "byte quantity out of range" })
}

/// Parses a bit rate in bits per second: `bps`, `kbps`, `Mbps`, `Gbps`
/// (decimal multipliers), suffix optional.
pub fn parse_bitrate(s: &str) -> Result<u64, Fail> {
    let (value, suffix) = split_magnitude(s)?;
    let mult = match suffix {
        "" | "bps" => 1,
        "k" | "kbps" => KB,
        "M" | "Mbps" => KB * KB,
        "G" | "Gbps" => KB * KB * KB,
        _ => return Err(Fail::Invalid { details: "unknown bitrate suffix" }),
    };
    value
        .checked_mul(mult)
        .ok_or(Fail::Invalid { details: "bitrate out of range" })
}

/// Parses a time span into microseconds: `us`, `ms`, `s`, `m`, `h`; a bare
/// number reads as microseconds.
pub fn parse_time_us(s: &str) -> Result<u64, Fail> {
    let (value, suffix) = split_magnitude(s)?;
    let mult = match suffix {
        "" | "us" => 1,
        "ms" => 1_000,
        "s" => 1_000_000,
        "m" => 60 * 1_000_000,
        "h" => 3600 * 1_000_000,
        _ => return Err(Fail::Invalid { details: "unknown time suffix" }),
    };
    value
        .checked_mul(mult)
        .ok_or(Fail::Invalid { details: "time span out of range" })
}

fn scaled(value: f64, steps: usize) -> (f64, usize) {
    let mut v = value;
    let mut i = 0;
    while v >= 1000.0 && i + 1 < steps {
        v /= 1000.0;
        i += 1;
    }
    (v, i)
}

/// Formats a byte count with a decimal SI prefix, e.g. `1.05 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const NAMES: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let (v, i) = scaled(bytes as f64, NAMES.len());
    if i == 0 {
        format!("{} {}", bytes, NAMES[0])
    } else {
        format!("{:.2} {}", v, NAMES[i])
    }
}

/// Formats a bit rate, e.g. `8.00 Mbps`.
pub fn format_bitrate(bps: u64) -> String {
    const NAMES: [&str; 5] = ["bps", "kbps", "Mbps", "Gbps", "Tbps"];
    let (v, i) = scaled(bps as f64, NAMES.len());
    if i == 0 {
        format!("{} {}", bps, NAMES[0])
    } else {
        format!("{:.2} {}", v, NAMES[i])
    }
}

/// Formats a microsecond span, e.g. `5.00 s` or `750 us`.
pub fn format_time_us(us: u64) -> String {
    if us >= 1_000_000 {
        format!("{:.2} s", us as f64 / 1_000_000.0)
    } else if us >= 1_000 {
        format!("{:.2} ms", us as f64 / 1_000.0)
    } else {
        format!("{} us", us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_suffixes() {
        assert_eq!(parse_bytes("512").unwrap(), 512);
        assert_eq!(parse_bytes("1KiB").unwrap(), 1024);
        assert_eq!(parse_bytes("64KiB").unwrap(), 65536);
        assert_eq!(parse_bytes("2MB").unwrap(), 2_000_000);
        assert_eq!(parse_bytes("1MiB").unwrap(), 1_048_576);
        assert!(parse_bytes("oops").is_err());
        assert!(parse_bytes("1XB").is_err());
    }

    #[test]
    fn bitrate_suffixes() {
        assert_eq!(parse_bitrate("0").unwrap(), 0);
        assert_eq!(parse_bitrate("8Mbps").unwrap(), 8_000_000);
        assert_eq!(parse_bitrate("100kbps").unwrap(), 100_000);
        assert!(parse_bitrate("1MiBps").is_err());
    }

    #[test]
    fn time_suffixes() {
        assert_eq!(parse_time_us("250").unwrap(), 250);
        assert_eq!(parse_time_us("5s").unwrap(), 5_000_000);
        assert_eq!(parse_time_us("100ms").unwrap(), 100_000);
        assert_eq!(parse_time_us("2m").unwrap(), 120_000_000);
    }

    #[test]
    fn formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1_048_576), "1.05 MB");
        assert_eq!(format_bitrate(8_000_000), "8.00 Mbps");
        assert_eq!(format_time_us(750), "750 us");
        assert_eq!(format_time_us(5_000_000), "5.00 s");
    }
}
