//! Tile and entry-bundle URL addressing.
//!
//! Large indices are sharded into `/x123/x456/789`-style path segments so no
//! directory (or URL) ever needs more than 1000 entries at one level, the
//! same convention transparency-log tile servers use. The final segment may
//! carry a `.p{N}` suffix to request a tile or bundle that is still partial,
//! i.e. not yet sealed to its full width.

use crate::error::{Error, Result};

/// Parses a `{index...}` path tail such as `x001/x234/067` or
/// `x001/x234/067.p5` into `(index, requested_partial_size)`. Every shard but
/// the last is exactly three digits prefixed with `x`; the last is 1-3 plain
/// digits, optionally followed by `.p` and a decimal partial size.
pub fn parse_index_path(path: &str) -> Result<(u64, Option<u64>)> {
    if path.is_empty() {
        return Err(Error::Malformed("empty tile index path".into()));
    }

    let mut segments: Vec<&str> = path.split('/').collect();
    let tail = segments.pop().expect("checked non-empty above");
    let (tail, partial) = match tail.split_once(".p") {
        Some((digits, size)) => {
            let size: u64 = size
                .parse()
                .map_err(|_| Error::Malformed(format!("partial suffix {tail:?} is not numeric")))?;
            (digits, Some(size))
        }
        None => (tail, None),
    };
    if tail.is_empty() || tail.len() > 3 || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Malformed(format!("tile path tail {tail:?} is not 1-3 digits")));
    }

    let mut decimal = String::new();
    for shard in &segments {
        let digits = shard
            .strip_prefix('x')
            .ok_or_else(|| Error::Malformed(format!("tile path shard {shard:?} missing 'x' prefix")))?;
        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Malformed(format!("tile path shard {shard:?} is not three digits")));
        }
        decimal.push_str(digits);
    }
    decimal.push_str(tail);

    let index: u64 = decimal
        .parse()
        .map_err(|_| Error::Malformed(format!("tile index {decimal:?} overflows")))?;
    Ok((index, partial))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_index_parses() {
        assert_eq!(parse_index_path("42").unwrap(), (42, None));
    }

    #[test]
    fn sharded_index_parses() {
        assert_eq!(parse_index_path("x001/x234/067").unwrap(), (1_234_067, None));
    }

    #[test]
    fn partial_suffix_parses() {
        assert_eq!(parse_index_path("067.p5").unwrap(), (67, Some(5)));
    }

    #[test]
    fn sharded_partial_suffix_parses() {
        assert_eq!(parse_index_path("x001/067.p200").unwrap(), (1067, Some(200)));
    }

    #[test]
    fn missing_x_prefix_is_malformed() {
        assert!(parse_index_path("001/234/067").is_err());
    }

    #[test]
    fn wrong_shard_width_is_malformed() {
        assert!(parse_index_path("x01/067").is_err());
    }

    #[test]
    fn non_numeric_partial_suffix_is_malformed() {
        assert!(parse_index_path("067.pXX").is_err());
    }

    #[test]
    fn empty_path_is_malformed() {
        assert!(parse_index_path("").is_err());
    }
}
