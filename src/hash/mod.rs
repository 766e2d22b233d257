use std::collections::{BTreeMap, HashMap};

/// Query parameter carrying the request signature. Never part of a key.
pub const SIG_PARAM_NAME: &str = "sig";

const KEY_JOINER: &str = "||";

// MD5 is used as a fast, well distributed fingerprint, not as a security
// primitive. Authenticity of requests is the signature module's job.
pub fn tokey(args: &[&str]) -> String {
    format!("{:x}", md5::compute(args.join(KEY_JOINER).as_bytes()))
}

/// Serializes a sorted map as a JSON object.
pub fn serialize(obj: &BTreeMap<&str, &str>) -> String {
    serde_json::to_string(obj).unwrap_or_default()
}

/// Computes the cache key of a set of request parameters.
///
/// Keys are sorted and the `sig` parameter is dropped, so two requests that
/// only differ by parameter order or signature share the same key.
pub fn fingerprint(params: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<&str, &str> = params
        .iter()
        .filter(|(k, _)| k.as_str() != SIG_PARAM_NAME)
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    tokey(&[&serialize(&sorted)])
}

/// Splits `key` into `depth` segments of `width` characters.
///
/// With `rest_only` the remaining suffix is appended as the last segment,
/// otherwise the whole key is appended so it can be recovered from the path.
///
/// # Panics
///
/// Panics if `width * depth` is larger than the key length.
pub fn shard(key: &str, width: usize, depth: usize, rest_only: bool) -> Vec<String> {
    let mut results: Vec<String> = (0..depth)
        .map(|i| key[width * i..width * (i + 1)].to_string())
        .collect();

    if rest_only {
        results.push(key[width * depth..].to_string());
    } else {
        results.push(key.to_string());
    }

    results
}
