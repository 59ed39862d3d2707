//! Tag normalization, build-number extraction and tag-signature computation
//! (spec §3 invariants, §4.3, §8 boundary behaviors).

use regex::Regex;
use std::sync::LazyLock;

static VDOT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"v\.(?=\d)").unwrap());
static BUILD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"v\d+\.\d+\.(\d+)$").unwrap());
static SERVICE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)-v\d+\.\d+\.\d+$").unwrap());

/// Normalize a tag: `v.X.Y.Z -> vX.Y.Z` and `-v.X -> -vX`. The empty string
/// normalizes to itself.
pub fn normalize_tag(raw: &str) -> String {
    VDOT_RE.replace_all(raw, "v").into_owned()
}

/// Extract the build number: the final numeric group of `v\d+\.\d+\.(\d+)$`,
/// applied to the normalized tag. Returns empty string when the tag doesn't
/// match the pattern.
pub fn extract_build_number(raw: &str) -> String {
    let normalized = normalize_tag(raw);
    BUILD_RE
        .captures(&normalized)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Derive a service key from an image tag when it matches
/// `^(.+)-v\d+\.\d+\.\d+$`, per spec §4.3.
pub fn service_key_from_tag(tag: &str) -> Option<String> {
    SERVICE_KEY_RE
        .captures(tag)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Derive a service key from the last path segment of an image reference,
/// used as the fallback when the tag doesn't carry a service-key prefix
/// (spec §4.3: "else the last path segment of `image`").
pub fn service_key_from_image(image: &str) -> String {
    image
        .rsplit('/')
        .next()
        .unwrap_or(image)
        .to_string()
}

/// Compute the tag signature of a set of normalized tags: sorted,
/// pipe-joined. Two kustomizations with equal signatures are "no tag
/// change" (spec §4.3).
pub fn tag_signature<I, S>(tags: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = tags
        .into_iter()
        .map(|t| normalize_tag(t.as_ref()))
        .collect();
    normalized.sort();
    normalized.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_tag_boundary_cases() {
        assert_eq!(normalize_tag("v.0.0.588"), "v0.0.588");
        assert_eq!(normalize_tag("svc-v.0.0.588"), "svc-v0.0.588");
        assert_eq!(normalize_tag(""), "");
    }

    #[test]
    fn build_number_boundary_cases() {
        assert_eq!(extract_build_number("my-svc-v0.0.112"), "112");
        assert_eq!(extract_build_number("v0.0.112"), "112");
        assert_eq!(extract_build_number("foo"), "");
    }

    #[test]
    fn service_key_prefers_tag_prefix() {
        assert_eq!(
            service_key_from_tag("payments-v1.2.3"),
            Some("payments".to_string())
        );
        assert_eq!(service_key_from_tag("v1.2.3"), None);
    }

    #[test]
    fn service_key_from_image_takes_last_segment() {
        assert_eq!(
            service_key_from_image("registry.example.com/team/payments"),
            "payments"
        );
    }

    #[test]
    fn signature_ignores_order_and_detects_change() {
        let a = tag_signature(["svc-v.1.0.0", "other-v.2.0.0"]);
        let b = tag_signature(["other-v.2.0.0", "svc-v.1.0.0"]);
        assert_eq!(a, b);

        let c = tag_signature(["svc-v.1.0.1", "other-v.2.0.0"]);
        assert_ne!(a, c);
    }

    proptest! {
        #[test]
        fn normalize_tag_never_panics(s in ".*") {
            let _ = normalize_tag(&s);
        }

        #[test]
        fn build_number_is_digits_or_empty(s in ".*") {
            let b = extract_build_number(&s);
            assert!(b.is_empty() || b.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
