//! Credential redaction for log lines (spec §7): strips the configured API
//! key and any `apikey=`/`key=`/userinfo-style credentials embedded in URLs
//! before a string reaches `tracing`.

/// Replace every occurrence of `secret` (if non-empty) with `***`, and mask
/// common URL credential patterns (`://user:pass@`, `?apikey=...`, `&key=...`).
pub fn redact(input: &str, secret: &str) -> String {
    let mut out = if secret.is_empty() {
        input.to_owned()
    } else {
        input.replace(secret, "***")
    };
    out = redact_url_userinfo(&out);
    out = redact_query_param(&out, "apikey");
    out = redact_query_param(&out, "key");
    out
}

fn redact_url_userinfo(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(scheme_at) = rest.find("://") {
        let (before, after_scheme) = rest.split_at(scheme_at + 3);
        result.push_str(before);
        match after_scheme.find('@') {
            Some(at_pos) if !after_scheme[..at_pos].contains('/') => {
                result.push_str("***@");
                rest = &after_scheme[at_pos + 1..];
            }
            _ => {
                result.push_str(after_scheme);
                rest = "";
                break;
            }
        }
    }
    result.push_str(rest);
    result
}

fn redact_query_param(input: &str, key: &str) -> String {
    let marker = format!("{key}=");
    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(&marker) {
        result.push_str(&rest[..pos]);
        result.push_str(&marker);
        result.push_str("***");
        let after = &rest[pos + marker.len()..];
        let end = after.find(['&', ' ', '"']).unwrap_or(after.len());
        rest = &after[end..];
    }
    result.push_str(rest);
    result
}
