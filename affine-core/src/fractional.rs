//! Fractional index keys for ordering siblings in flat hierarchies.
//!
//! Keys follow the usual base-62 fractional-indexing layout: an "integer"
//! head (`a0`, `a1`, ..., `b00`, ...) followed by fractional digits that never
//! end in `0`. Every generated key additionally carries a random subkey of
//! [`SUBKEY_LEN`] characters, so two clients inserting at the same position
//! without coordinating still produce distinct keys.
//!
//! Ordering is plain byte-wise string comparison, which is what the remote
//! store uses when it sorts folder entries.

use rand::Rng;

use crate::error::{CoreError, Result};

pub const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Length of the random suffix appended to every generated key.
pub const SUBKEY_LEN: usize = 8;

const INTEGER_ZERO: &str = "a0";
const SMALLEST_INTEGER: &str = "A00000000000000000000000000";

/// Generate a key strictly between `a` and `b`.
///
/// `None` means "unbounded" on that side. Fails with `InvalidRange` when
/// `a >= b`.
pub fn index_between(a: Option<&str>, b: Option<&str>) -> Result<String> {
    if let (Some(a), Some(b)) = (a, b) {
        if a >= b {
            return Err(CoreError::InvalidRange(format!(
                "lower bound {a:?} must sort before upper bound {b:?}"
            )));
        }
    }

    let lower = a.map(strip_subkey);
    let upper = b.map(strip_subkey);
    let suffix = random_subkey();

    let standard = match (lower, upper) {
        (Some(lo), Some(hi)) if lo >= hi => None,
        _ => key_between(lower, upper).ok(),
    };
    if let Some(base) = standard {
        let candidate = format!("{base}{suffix}");
        if strictly_between(a, &candidate, b) {
            return Ok(candidate);
        }
    }

    // Foreign keys (or colliding subkeys) can leave no room for a standard
    // key; fall back to a raw midpoint over the full strings.
    let base = raw_between(a.unwrap_or("").as_bytes(), b.map(str::as_bytes)).ok_or_else(|| {
        CoreError::InvalidRange(format!("no key fits between {a:?} and {b:?}"))
    })?;
    let base = String::from_utf8(base)
        .map_err(|_| CoreError::InvalidRange("bounds are not valid UTF-8 keys".to_string()))?;
    Ok(format!("{base}{suffix}"))
}

/// Generate `n` ascending keys, all strictly between `a` and `b`.
pub fn n_indices_between(a: Option<&str>, b: Option<&str>, n: usize) -> Result<Vec<String>> {
    let mut keys = Vec::with_capacity(n);
    let mut lower = a.map(str::to_string);
    for _ in 0..n {
        let key = index_between(lower.as_deref(), b)?;
        lower = Some(key.clone());
        keys.push(key);
    }
    Ok(keys)
}

fn strictly_between(a: Option<&str>, key: &str, b: Option<&str>) -> bool {
    a.map_or(true, |a| a < key) && b.map_or(true, |b| key < b)
}

fn random_subkey() -> String {
    let mut rng = rand::thread_rng();
    (0..SUBKEY_LEN)
        .map(|_| DIGITS[rng.gen_range(0..DIGITS.len())] as char)
        .collect()
}

/// Drop the random subkey when what remains is a well-formed order key.
fn strip_subkey(key: &str) -> &str {
    if key.len() > SUBKEY_LEN && key.is_char_boundary(key.len() - SUBKEY_LEN) {
        let head = &key[..key.len() - SUBKEY_LEN];
        if validate_order_key(head).is_ok() {
            return head;
        }
    }
    key
}

fn digit_index(c: u8) -> Option<usize> {
    DIGITS.iter().position(|d| *d == c)
}

fn integer_length(head: u8) -> Result<usize> {
    match head {
        b'a'..=b'z' => Ok((head - b'a') as usize + 2),
        b'A'..=b'Z' => Ok((b'Z' - head) as usize + 2),
        _ => Err(CoreError::InvalidRange(format!(
            "invalid order key head: {:?}",
            head as char
        ))),
    }
}

fn integer_part(key: &str) -> Result<&str> {
    let head = *key
        .as_bytes()
        .first()
        .ok_or_else(|| CoreError::InvalidRange("empty order key".to_string()))?;
    let len = integer_length(head)?;
    if len > key.len() {
        return Err(CoreError::InvalidRange(format!("invalid order key: {key:?}")));
    }
    Ok(&key[..len])
}

fn validate_order_key(key: &str) -> Result<()> {
    if key == SMALLEST_INTEGER {
        return Err(CoreError::InvalidRange(format!("invalid order key: {key:?}")));
    }
    if !key.bytes().all(|c| digit_index(c).is_some()) {
        return Err(CoreError::InvalidRange(format!("invalid order key: {key:?}")));
    }
    let int = integer_part(key)?;
    if key[int.len()..].ends_with('0') {
        return Err(CoreError::InvalidRange(format!("invalid order key: {key:?}")));
    }
    Ok(())
}

fn increment_integer(int: &str) -> Option<String> {
    let bytes = int.as_bytes();
    let head = bytes[0];
    let mut digits: Vec<u8> = bytes[1..].to_vec();
    let mut carry = true;
    for slot in digits.iter_mut().rev() {
        let next = digit_index(*slot)? + 1;
        if next == DIGITS.len() {
            *slot = b'0';
        } else {
            *slot = DIGITS[next];
            carry = false;
            break;
        }
    }
    if carry {
        if head == b'Z' {
            return Some(INTEGER_ZERO.to_string());
        }
        if head == b'z' {
            return None;
        }
        let next_head = head + 1;
        if next_head > b'a' {
            digits.push(b'0');
        } else {
            digits.pop();
        }
        let mut out = vec![next_head];
        out.extend(digits);
        return String::from_utf8(out).ok();
    }
    let mut out = vec![head];
    out.extend(digits);
    String::from_utf8(out).ok()
}

fn decrement_integer(int: &str) -> Option<String> {
    let bytes = int.as_bytes();
    let head = bytes[0];
    let mut digits: Vec<u8> = bytes[1..].to_vec();
    let mut borrow = true;
    for slot in digits.iter_mut().rev() {
        let idx = digit_index(*slot)?;
        if idx == 0 {
            *slot = DIGITS[DIGITS.len() - 1];
        } else {
            *slot = DIGITS[idx - 1];
            borrow = false;
            break;
        }
    }
    if borrow {
        if head == b'a' {
            return Some(format!("Z{}", DIGITS[DIGITS.len() - 1] as char));
        }
        if head == b'A' {
            return None;
        }
        let prev_head = head - 1;
        if prev_head < b'Z' {
            digits.push(DIGITS[DIGITS.len() - 1]);
        } else {
            digits.pop();
        }
        let mut out = vec![prev_head];
        out.extend(digits);
        return String::from_utf8(out).ok();
    }
    let mut out = vec![head];
    out.extend(digits);
    String::from_utf8(out).ok()
}

/// Midpoint of two fractional digit strings (`b == None` means unbounded).
fn midpoint(a: &[u8], b: Option<&[u8]>) -> Vec<u8> {
    if let Some(b) = b {
        let mut n = 0;
        while n < b.len() && a.get(n).copied().unwrap_or(DIGITS[0]) == b[n] {
            n += 1;
        }
        if n > 0 {
            let mut out = b[..n].to_vec();
            out.extend(midpoint(a.get(n..).unwrap_or(&[]), Some(&b[n..])));
            return out;
        }
    }

    let digit_a = a.first().and_then(|c| digit_index(*c)).unwrap_or(0);
    let digit_b = b
        .and_then(|b| b.first())
        .and_then(|c| digit_index(*c))
        .unwrap_or(DIGITS.len());
    if digit_b - digit_a > 1 {
        vec![DIGITS[(digit_a + digit_b + 1) / 2]]
    } else if let Some(b) = b.filter(|b| b.len() > 1) {
        vec![b[0]]
    } else {
        let mut out = vec![DIGITS[digit_a]];
        out.extend(midpoint(a.get(1..).unwrap_or(&[]), None));
        out
    }
}

/// Standard fractional-indexing key between two well-formed keys.
pub fn key_between(a: Option<&str>, b: Option<&str>) -> Result<String> {
    if let Some(a) = a {
        validate_order_key(a)?;
    }
    if let Some(b) = b {
        validate_order_key(b)?;
    }

    let invalid = || CoreError::InvalidRange(format!("cannot place a key between {a:?} and {b:?}"));
    match (a, b) {
        (None, None) => Ok(INTEGER_ZERO.to_string()),
        (None, Some(b)) => {
            let ib = integer_part(b)?;
            let fb = &b[ib.len()..];
            if ib == SMALLEST_INTEGER {
                let frac = midpoint(b"", Some(fb.as_bytes()));
                return Ok(format!("{ib}{}", String::from_utf8_lossy(&frac)));
            }
            if ib < b {
                return Ok(ib.to_string());
            }
            decrement_integer(ib).ok_or_else(invalid)
        }
        (Some(a), None) => {
            let ia = integer_part(a)?;
            let fa = &a[ia.len()..];
            match increment_integer(ia) {
                Some(next) => Ok(next),
                None => {
                    let frac = midpoint(fa.as_bytes(), None);
                    Ok(format!("{ia}{}", String::from_utf8_lossy(&frac)))
                }
            }
        }
        (Some(a), Some(b)) => {
            if a >= b {
                return Err(invalid());
            }
            let ia = integer_part(a)?;
            let fa = &a[ia.len()..];
            let ib = integer_part(b)?;
            let fb = &b[ib.len()..];
            if ia == ib {
                let frac = midpoint(fa.as_bytes(), Some(fb.as_bytes()));
                return Ok(format!("{ia}{}", String::from_utf8_lossy(&frac)));
            }
            let next = increment_integer(ia).ok_or_else(invalid)?;
            if next.as_str() < b {
                Ok(next)
            } else {
                let frac = midpoint(fa.as_bytes(), None);
                Ok(format!("{ia}{}", String::from_utf8_lossy(&frac)))
            }
        }
    }
}

/// Any string greater than `a`, using digits from the key alphabet.
fn raw_after(a: &[u8]) -> Vec<u8> {
    let top = DIGITS[DIGITS.len() - 1];
    let mut out = Vec::with_capacity(a.len() + 1);
    for &c in a {
        if c < top {
            let above: Vec<u8> = DIGITS.iter().copied().filter(|d| *d > c).collect();
            out.push(above[above.len() / 2]);
            return out;
        }
        out.push(c);
    }
    out.push(DIGITS[DIGITS.len() / 2]);
    out
}

/// A string strictly between `a` and `b` that is never a prefix of `b`, so
/// any suffix can be appended without leaving the range.
fn raw_between(a: &[u8], b: Option<&[u8]>) -> Option<Vec<u8>> {
    let Some(b) = b else {
        return Some(raw_after(a));
    };

    let mut prefix = Vec::new();
    let mut i = 0;
    while i < a.len() && i < b.len() && a[i] == b[i] {
        prefix.push(a[i]);
        i += 1;
    }

    let upper = *b.get(i)?;
    let lower = a.get(i).copied();
    let candidates: Vec<u8> = DIGITS
        .iter()
        .copied()
        .filter(|d| lower.map_or(true, |lo| *d > lo) && *d < upper)
        .collect();
    if !candidates.is_empty() {
        prefix.push(candidates[candidates.len() / 2]);
        return Some(prefix);
    }

    match lower {
        Some(lo) => {
            prefix.push(lo);
            prefix.extend(raw_after(&a[i + 1..]));
            Some(prefix)
        }
        None => {
            prefix.push(upper);
            let rest = raw_between(b"", Some(&b[i + 1..]))?;
            prefix.extend(rest);
            Some(prefix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_standard_keys_follow_the_usual_layout() {
        assert_eq!(key_between(None, None).unwrap(), "a0");
        assert_eq!(key_between(Some("a0"), None).unwrap(), "a1");
        assert_eq!(key_between(None, Some("a0")).unwrap(), "Zz");
        assert_eq!(key_between(Some("a0"), Some("a1")).unwrap(), "a0V");
        assert_eq!(key_between(Some("az"), None).unwrap(), "b00");
    }

    #[test]
    fn test_generated_keys_carry_a_subkey() {
        let key = index_between(None, None).unwrap();
        assert_eq!(key.len(), 2 + SUBKEY_LEN);
        assert!(key.starts_with("a0"));
    }

    #[test]
    fn test_key_between_existing_siblings() {
        let key = index_between(Some("a0"), Some("a1")).unwrap();
        assert!("a0" < key.as_str());
        assert!(key.as_str() < "a1");
        assert!(key.starts_with("a0V"));
    }

    #[test]
    fn test_inverted_bounds_are_rejected() {
        assert!(matches!(
            index_between(Some("a1"), Some("a0")),
            Err(CoreError::InvalidRange(_))
        ));
        assert!(matches!(
            index_between(Some("a1"), Some("a1")),
            Err(CoreError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_keys_with_same_stripped_prefix_still_order() {
        let a = "a0AAAAAAAA";
        let b = "a0AAAAAAAB";
        let key = index_between(Some(a), Some(b)).unwrap();
        assert!(a < key.as_str() && key.as_str() < b, "{key}");
    }

    #[test]
    fn test_appending_produces_ascending_keys() {
        let keys = n_indices_between(None, None, 20).unwrap();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_foreign_keys_are_handled() {
        let key = index_between(Some("0"), Some("00")).unwrap_err();
        assert!(matches!(key, CoreError::InvalidRange(_)));

        let key = index_between(Some("hello"), Some("help")).unwrap();
        assert!("hello" < key.as_str() && key.as_str() < "help");
    }

    fn order_key() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("a0".to_string()),
            Just("a1".to_string()),
            "[a-c][0-9A-Za-z]{1,3}[1-9A-Za-z]{0,2}",
            "[0-9A-Za-z]{1,12}",
        ]
    }

    proptest! {
        #[test]
        fn test_nested_generation_stays_in_range(x in order_key(), y in order_key()) {
            prop_assume!(x != y);
            let (a, b) = if x < y { (x, y) } else { (y, x) };
            if let Ok(mid) = index_between(Some(&a), Some(&b)) {
                prop_assert!(a < mid && mid < b);

                let left = index_between(Some(&a), Some(&mid)).unwrap();
                prop_assert!(a < left && left < mid);

                let right = index_between(Some(&mid), Some(&b)).unwrap();
                prop_assert!(mid < right && right < b);
            }
        }

        #[test]
        fn test_open_bounds_respect_the_closed_side(x in order_key()) {
            let after = index_between(Some(&x), None).unwrap();
            prop_assert!(x < after);
            if let Ok(before) = index_between(None, Some(&x)) {
                prop_assert!(before < x);
            }
        }
    }
}
