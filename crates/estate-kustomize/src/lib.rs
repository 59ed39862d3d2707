//! Kustomization YAML parser (spec §4.3). Extracts `{serviceKey, image,
//! tag, buildNumber}` tuples from a kustomization-style overlay document and
//! computes the tag signature used by the Component Assembler and the
//! history stores to detect "deployment happened".

use estate_types::{extract_build_number, service_key_from_image, service_key_from_tag, tag_signature};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedComponent {
    pub service_key: String,
    pub image: String,
    pub tag: String,
    pub build_number: String,
}

#[derive(Deserialize)]
struct KustomizationDoc {
    #[serde(default)]
    images: Vec<ImageEntry>,
}

#[derive(Deserialize)]
struct ImageEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "newName")]
    new_name: Option<String>,
    #[serde(default, rename = "newTag")]
    new_tag: Option<String>,
}

/// Parse a kustomization-style YAML document into its ordered list of
/// extracted components (spec §4.3). Malformed YAML yields an error; a
/// document with no `images` entries yields an empty list (callers treat
/// that as `NO_TAG_FOUND`, spec §4.4 step 3).
pub fn parse(yaml: &str) -> Result<Vec<ExtractedComponent>, String> {
    let doc: KustomizationDoc =
        serde_yaml::from_str(yaml).map_err(|e| format!("invalid kustomization YAML: {e}"))?;

    let mut out = Vec::new();
    for entry in doc.images {
        let Some(tag) = entry.new_tag else { continue };
        let image = entry
            .new_name
            .or(entry.name)
            .unwrap_or_default();
        if image.is_empty() {
            continue;
        }
        let service_key = service_key_from_tag(&tag).unwrap_or_else(|| service_key_from_image(&image));
        let build_number = extract_build_number(&tag);
        out.push(ExtractedComponent {
            service_key,
            image,
            tag,
            build_number,
        });
    }

    // If exactly one component was extracted, rename it to `serviceKey`
    // is the *assembler's* job (spec §4.4 step 4, which knows the
    // configured serviceKey for the (env, service) pair being assembled);
    // this parser only derives a best-effort key from the tuple itself.
    Ok(out)
}

/// The tag signature of a parsed kustomization: sorted, pipe-joined
/// normalized tags (spec §4.3 glossary). Two kustomizations with equal
/// signatures are "no tag change"; infra-only edits must not move it.
pub fn signature(components: &[ExtractedComponent]) -> String {
    tag_signature(components.iter().map(|c| c.tag.as_str()))
}

/// Candidate paths for fetching a kustomization for `env`, tried in order
/// (spec §4.3): `envs/{env}/kustomization.{yaml,yml}`, then
/// `overlays/{env}/kustomization.{yaml,yml}`.
pub fn candidate_paths(env: &str) -> Vec<String> {
    vec![
        format!("envs/{env}/kustomization.yaml"),
        format!("envs/{env}/kustomization.yml"),
        format!("overlays/{env}/kustomization.yaml"),
        format!("overlays/{env}/kustomization.yml"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
images:
  - name: registry.example.com/acme/payments
    newName: registry.example.com/acme/payments
    newTag: payments-v1.2.3
  - name: registry.example.com/acme/sidecar
    newTag: v0.0.5
"#;

    #[test]
    fn parses_image_tuples() {
        let components = parse(SAMPLE).unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].service_key, "payments");
        assert_eq!(components[0].build_number, "3");
        assert_eq!(components[1].service_key, "sidecar");
        assert_eq!(components[1].build_number, "5");
    }

    #[test]
    fn empty_images_list_yields_empty_components() {
        let components = parse("images: []").unwrap();
        assert!(components.is_empty());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(parse(": : not yaml").is_err());
    }

    #[test]
    fn signature_is_sorted_and_pipe_joined() {
        let components = parse(SAMPLE).unwrap();
        let sig = signature(&components);
        assert_eq!(sig, "payments-v1.2.3|v0.0.5");
    }

    #[test]
    fn infra_only_edits_do_not_change_signature() {
        let a = parse(SAMPLE).unwrap();
        let b = parse(&format!("{SAMPLE}\nresources:\n  - other.yaml\n")).unwrap();
        assert_eq!(signature(&a), signature(&b));
    }

    #[test]
    fn candidate_paths_try_envs_before_overlays() {
        let paths = candidate_paths("qa");
        assert_eq!(
            paths,
            vec![
                "envs/qa/kustomization.yaml",
                "envs/qa/kustomization.yml",
                "overlays/qa/kustomization.yaml",
                "overlays/qa/kustomization.yml",
            ]
        );
    }
}
