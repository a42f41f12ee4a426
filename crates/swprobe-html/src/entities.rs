//! Character reference decoding for attribute values.
//!
//! Script `src` attributes only ever need the handful of references that
//! show up in URLs, so the named table is deliberately short.

use std::collections::HashMap;

lazy_static::lazy_static! {
    static ref ENTITIES: HashMap<&'static str, char> = {
        let mut m = HashMap::new();
        m.insert("amp", '&');
        m.insert("lt", '<');
        m.insert("gt", '>');
        m.insert("quot", '"');
        m.insert("apos", '\'');
        m.insert("sol", '/');
        m.insert("colon", ':');
        m.insert("quest", '?');
        m.insert("equals", '=');
        m.insert("num", '#');
        m.insert("percnt", '%');
        m.insert("nbsp", '\u{00A0}');
        m
    };
}

const MAX_REFERENCE_LEN: usize = 32;

/// Decode character references in `input`.
///
/// Unknown or unterminated references are copied through unchanged.
pub fn decode(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('&') {
        result.push_str(&rest[..start]);
        let candidate = &rest[start + 1..];

        let decoded = candidate
            .find(';')
            .filter(|&end| end > 0 && end <= MAX_REFERENCE_LEN)
            .and_then(|end| lookup(&candidate[..end]).map(|ch| (ch, end)));

        match decoded {
            Some((ch, end)) => {
                result.push(ch);
                rest = &candidate[end + 1..];
            }
            None => {
                result.push('&');
                rest = candidate;
            }
        }
    }

    result.push_str(rest);
    result
}

fn lookup(reference: &str) -> Option<char> {
    match reference.strip_prefix('#') {
        Some(numeric) => {
            let code_point = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            char::from_u32(code_point)
        }
        None => ENTITIES.get(reference).copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_query_separator() {
        assert_eq!(decode("/app.js?v=1&amp;lang=en"), "/app.js?v=1&lang=en");
    }

    #[test]
    fn test_decode_numeric_entities() {
        assert_eq!(decode("&#47;sw.js"), "/sw.js");
        assert_eq!(decode("&#x2F;sw.js"), "/sw.js");
    }

    #[test]
    fn test_decode_unknown_entity() {
        assert_eq!(decode("&unknown;"), "&unknown;");
    }

    #[test]
    fn test_decode_bare_ampersand() {
        assert_eq!(decode("a.js?x=1&y=2"), "a.js?x=1&y=2");
        assert_eq!(decode("&"), "&");
    }
}
