//! Filename comparison and collation
//!
//! Case folding is restricted to the ASCII range. Names are compared as UTF-16
//! code units, the way $I30 indexes store them.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How path components and stream names are matched against on-disk names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseMode {
    /// Exact comparison
    #[serde(rename = "CASE_LITERAL")]
    Literal,
    /// ASCII case-insensitive comparison
    #[serde(rename = "CASE_INSENSITIVE")]
    Fold,
}

#[inline]
fn upcase_unit(unit: u16) -> u16 {
    if (b'a' as u16..=b'z' as u16).contains(&unit) {
        unit - 0x20
    } else {
        unit
    }
}

/// Do `on_disk` and `wanted` name the same object under `mode`?
pub fn names_match(on_disk: &str, wanted: &str, mode: CaseMode) -> bool {
    match mode {
        CaseMode::Literal => on_disk == wanted,
        CaseMode::Fold => on_disk.eq_ignore_ascii_case(wanted),
    }
}

/// Order two names the way a filename index sorts its keys (upcased code units)
pub fn collate(a: &str, b: &str) -> Ordering {
    a.encode_utf16()
        .map(upcase_unit)
        .cmp(b.encode_utf16().map(upcase_unit))
}

/// Collation is only trusted for pruning when both names are plain ASCII;
/// the on-disk $UpCase table may order other characters differently.
pub fn collation_is_reliable(a: &str, b: &str) -> bool {
    a.is_ascii() && b.is_ascii()
}
