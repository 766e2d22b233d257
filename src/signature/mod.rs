use std::collections::{BTreeMap, HashMap};

use hmac::{Hmac, Mac};
use lazy_static::lazy_static;
use regex::Regex;
use sha1::Sha1;

use crate::hash::SIG_PARAM_NAME;

type HmacSha1 = Hmac<Sha1>;

lazy_static! {
    static ref SIG_ASSIGNMENT: Regex = Regex::new(r"(^|&)sig=[^&]*").unwrap();
}

/// Hex encoded HMAC-SHA1 of `qs` keyed with `key`.
pub fn sign(key: &str, qs: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(qs.as_bytes());

    hex::encode(mac.finalize().into_bytes())
}

/// Returns `qs` with its signature appended as the `sig` parameter.
pub fn append_sign(key: &str, qs: &str) -> String {
    let signature = sign(key, qs);

    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(SIG_PARAM_NAME, &signature)
        .finish();

    format!("{}&{}", qs, encoded)
}

/// Checks the `sig` parameter of `qs` against the rest of the query string.
pub fn verify_sign(key: &str, qs: &str) -> bool {
    let unsigned = SIG_ASSIGNMENT.replace_all(qs, "");
    let unsigned = unsigned.trim_start_matches('&');

    let expected = sign(key, unsigned);

    let provided = url::form_urlencoded::parse(qs.as_bytes())
        .find(|(k, _)| k == SIG_PARAM_NAME)
        .map(|(_, v)| v.into_owned());

    match provided {
        Some(sig) => sig == expected,
        None => false,
    }
}

/// Builds the canonical query string of a parameter map: keys sorted,
/// form-urlencoded and joined with `&`.
pub fn canonical_query(params: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<&String, &String> = params.iter().collect();

    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "abcdef";
    const KNOWN_SIG: &str = "c9516346abf62876b6345817dba2f9a0c797ef26";

    #[test]
    fn sign_matches_known_vector() {
        assert_eq!(sign(SECRET, "x=1&y=2&z=3"), KNOWN_SIG);
    }

    #[test]
    fn append_sign_adds_sig_param() {
        assert_eq!(
            append_sign(SECRET, "x=1&y=2&z=3"),
            format!("x=1&y=2&z=3&sig={}", KNOWN_SIG)
        );
    }

    #[test]
    fn verify_known_signature() {
        assert!(verify_sign(SECRET, &format!("x=1&y=2&z=3&sig={}", KNOWN_SIG)));
    }

    #[test]
    fn verify_round_trip() {
        for (secret, qs) in [
            ("abcdef", "x=1&y=2&z=3"),
            ("another secret", "h=100&op=resize&url=http%3A%2F%2Fx%2Fa.jpg&w=100"),
            ("k", "a=1"),
            ("", "op=thumbnail&w=10&h=10"),
        ] {
            assert!(verify_sign(secret, &append_sign(secret, qs)), "{} / {}", secret, qs);
        }
    }

    #[test]
    fn verify_signature_in_the_middle_or_first() {
        let qs = "h=100&op=resize&w=100";
        let sig = sign(SECRET, qs);

        assert!(verify_sign(SECRET, &format!("h=100&op=resize&sig={}&w=100", sig)));

        let qs = "url=http%3A%2F%2Fx%2Fa.jpg&w=100";
        let sig = sign(SECRET, qs);
        assert!(verify_sign(SECRET, &format!("sig={}&{}", sig, qs)));
    }

    #[test]
    fn verify_rejects_tampered_parameters() {
        let signed = append_sign(SECRET, "op=resize&w=100&h=100");

        assert!(!verify_sign(SECRET, &signed.replace("w=100", "w=101")));
        assert!(!verify_sign(SECRET, &signed.replace("op=resize", "op=thumbnail")));
        assert!(!verify_sign("other", &signed));
    }

    #[test]
    fn verify_rejects_missing_or_empty_signature() {
        assert!(!verify_sign(SECRET, "x=1&y=2&z=3"));
        assert!(!verify_sign(SECRET, "x=1&y=2&z=3&sig="));
    }

    #[test]
    fn verify_does_not_strip_lookalike_keys() {
        let qs = "xsig=1&y=2";
        let signed = append_sign(SECRET, qs);
        assert!(verify_sign(SECRET, &signed));
    }

    #[test]
    fn canonical_query_is_sorted_and_encoded() {
        let params: HashMap<String, String> = [
            ("w", "100"),
            ("url", "http://x/a b.jpg"),
            ("op", "resize"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(
            canonical_query(&params),
            "op=resize&url=http%3A%2F%2Fx%2Fa+b.jpg&w=100"
        );
    }

    #[test]
    fn canonical_query_signature_round_trip() {
        let mut params: HashMap<String, String> = [("op", "resize"), ("w", "10"), ("h", "20")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let sig = sign(SECRET, &canonical_query(&params));
        params.insert("sig".to_string(), sig);

        assert!(verify_sign(SECRET, &canonical_query(&params)));
    }
}
