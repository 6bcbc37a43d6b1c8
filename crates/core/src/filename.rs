//! Server-side artifact filename generation.
//!
//! Stored names look like `YYYYMMDD_HHMMSS_<stem>.<ext>`, so a directory
//! listing sorts by upload time and repeated client names do not collide.

use time::OffsetDateTime;
use time::macros::format_description;

/// Name used when the client does not send one.
pub const DEFAULT_ARTIFACT_NAME: &str = "handshake";

/// Build the stored filename for an upload received at `at`.
///
/// Only the final path component of `original` is used, and characters
/// outside `[A-Za-z0-9._-]` are replaced with `_`. The extension, when
/// present, is preserved.
pub fn artifact_filename(original: Option<&str>, at: OffsetDateTime) -> String {
    let prefix = at
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| "00000000_000000".to_string());

    let base = original
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name))
        .map(sanitize)
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| DEFAULT_ARTIFACT_NAME.to_string());

    let (stem, ext) = split_extension(&base);
    match ext {
        Some(ext) => format!("{prefix}_{stem}.{ext}"),
        None => format!("{prefix}_{stem}"),
    }
}

/// Derive an alternative name for the `n`th collision on `filename`.
///
/// `20240101_120000_wifi.pcap` becomes `20240101_120000_wifi_2.pcap` for n = 2.
pub fn with_collision_suffix(filename: &str, n: u32) -> String {
    let (stem, ext) = split_extension(filename);
    match ext {
        Some(ext) => format!("{stem}_{n}.{ext}"),
        None => format!("{stem}_{n}"),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Split at the last dot. A leading dot belongs to the stem (`.cap` has no extension).
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}
