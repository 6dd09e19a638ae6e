//! Decoding of the text operands protocol 0 writes for strings.

/// Decode a `STRING` operand: a quoted Python 2 `repr()` of a byte
/// string, e.g. `'it\'s'` or `"a\x00b"`. Unknown escapes are kept
/// verbatim, as Python's `escape_decode` does.
pub fn unquote_string(line: &[u8]) -> Result<Vec<u8>, &'static str> {
    let body = match line {
        [q @ (b'\'' | b'"'), body @ .., last] if last == q => body,
        _ => return Err("the STRING argument must be quoted"),
    };

    let mut out = Vec::with_capacity(body.len());
    let mut it = body.iter().copied().peekable();
    while let Some(c) = it.next() {
        if c != b'\\' {
            out.push(c);
            continue;
        }
        let Some(e) = it.next() else {
            return Err("trailing backslash in STRING");
        };
        match e {
            b'\n' => (),
            b'\\' | b'\'' | b'"' => out.push(e),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'x' => {
                let hi = it.next().and_then(hex_digit);
                let lo = it.next().and_then(hex_digit);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                    _ => return Err("invalid \\x escape in STRING"),
                }
            }
            b'0'..=b'7' => {
                let mut n = u32::from(e - b'0');
                for _ in 0..2 {
                    match it.peek() {
                        Some(&d @ b'0'..=b'7') => {
                            n = n * 8 + u32::from(d - b'0');
                            it.next();
                        }
                        _ => break,
                    }
                }
                // Python masks octal escapes above \377 the same way.
                out.push((n & 0xff) as u8);
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Decode a `UNICODE` operand, which is `raw-unicode-escape` encoded:
/// every byte is a Latin-1 character except `\uXXXX` and `\UXXXXXXXX`.
pub fn raw_unicode_unescape(line: &[u8]) -> Result<String, &'static str> {
    let mut out = String::with_capacity(line.len());
    let mut idx = 0;
    while idx < line.len() {
        let c = line[idx];
        let width = match (c, line.get(idx + 1)) {
            (b'\\', Some(b'u')) => 4,
            (b'\\', Some(b'U')) => 8,
            _ => {
                out.push(char::from(c));
                idx += 1;
                continue;
            }
        };
        let digits = line
            .get(idx + 2..idx + 2 + width)
            .ok_or("truncated \\u escape in UNICODE")?;
        let code = digits.iter().try_fold(0u32, |acc, &d| {
            hex_digit(d).map(|v| (acc << 4) | u32::from(v))
        });
        let ch = code
            .and_then(char::from_u32)
            .ok_or("invalid \\u escape in UNICODE")?;
        out.push(ch);
        idx += 2 + width;
    }
    Ok(out)
}

/// Latin-1 view of a byte string, one char per byte.
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unquotes_both_quote_styles() {
        assert_eq!(unquote_string(b"'abc'").unwrap(), b"abc");
        assert_eq!(unquote_string(b"\"it's\"").unwrap(), b"it's");
        assert_eq!(unquote_string(b"''").unwrap(), b"");
    }

    #[test]
    fn rejects_unquoted() {
        assert!(unquote_string(b"abc").is_err());
        assert!(unquote_string(b"'abc\"").is_err());
        assert!(unquote_string(b"'").is_err());
    }

    #[test]
    fn decodes_escapes() {
        assert_eq!(
            unquote_string(br"'a\nb\tc\\d\'e'").unwrap(),
            b"a\nb\tc\\d'e"
        );
        assert_eq!(unquote_string(br"'\x00\xff\x41'").unwrap(), b"\x00\xffA");
        assert_eq!(unquote_string(br"'\0\101\7x'").unwrap(), b"\x00A\x07x");
        assert_eq!(unquote_string(br"'\q'").unwrap(), b"\\q");
        assert!(unquote_string(br"'\xZ1'").is_err());
    }

    #[test]
    fn raw_unicode_escapes() {
        assert_eq!(raw_unicode_unescape(b"caf\xe9").unwrap(), "café");
        assert_eq!(raw_unicode_unescape(br"\u20ac and \U0001f600").unwrap(), "€ and 😀");
        assert_eq!(raw_unicode_unescape(br"back\slash").unwrap(), "back\\slash");
        assert!(raw_unicode_unescape(br"\u12").is_err());
        assert!(raw_unicode_unescape(br"\ud800").is_err());
    }

    #[test]
    fn latin1_maps_bytes_to_chars() {
        assert_eq!(latin1(b"a\xe9"), "aé");
    }
}
