use super::DispatchError;
use sha2::{Digest, Sha256};
use std::fmt;

pub const DEFAULT_TAG: &str = "latest";
const DOCKER_HUB: &str = "docker.io";

/// Fully qualified image reference: registry, repository and tag and/or
/// digest are always explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageRef {
    pub fn reference(&self) -> String {
        let mut out = format!("{}/{}", self.registry, self.repository);
        if let Some(tag) = &self.tag {
            out.push(':');
            out.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }

    /// First 12 hex chars of the reference's SHA-256, used to tag step logs.
    pub fn short_hash(&self) -> String {
        let digest = Sha256::digest(self.reference().as_bytes());
        digest[..6].iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference())
    }
}

/// Normalizes a user supplied image name. Bare names land in
/// `{default_registry}/library/`, `ns/name` in `{default_registry}/ns/`, and a
/// first segment that looks like a host (`.`, `:` or `localhost`) is kept as
/// the registry. A missing tag defaults to `latest` unless a digest is given.
pub fn normalize_image(raw: &str, default_registry: &str) -> Result<ImageRef, DispatchError> {
    let trimmed = raw.trim();
    let invalid = |reason: &str| DispatchError::InvalidImage {
        reference: raw.to_string(),
        reason: reason.to_string(),
    };
    if trimmed.is_empty() {
        return Err(invalid("image reference is empty"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(invalid("image reference contains whitespace"));
    }

    let (name, digest) = match trimmed.split_once('@') {
        Some((name, digest)) => {
            if !digest.contains(':') || digest.ends_with(':') {
                return Err(invalid("digest must look like `algorithm:hex`"));
            }
            (name, Some(digest.to_string()))
        }
        None => (trimmed, None),
    };

    let last_slash = name.rfind('/').map_or(0, |idx| idx + 1);
    let (path, tag) = match name[last_slash..].rfind(':') {
        Some(idx) => {
            let split = last_slash + idx;
            let tag = &name[split + 1..];
            if tag.is_empty() {
                return Err(invalid("tag is empty"));
            }
            (&name[..split], Some(tag.to_string()))
        }
        None => (name, None),
    };
    let tag = match (tag, &digest) {
        (None, None) => Some(DEFAULT_TAG.to_string()),
        (tag, _) => tag,
    };

    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(invalid("empty path segment"));
    }
    let first = segments[0];
    let has_registry = segments.len() > 1
        && (first.contains('.') || first.contains(':') || first == "localhost");
    let (registry, repo_segments) = if has_registry {
        (first.to_string(), &segments[1..])
    } else {
        (default_registry.to_string(), &segments[..])
    };

    let mut repository = repo_segments.join("/");
    if !repository
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/'))
    {
        return Err(invalid("repository must be lowercase alphanumeric"));
    }
    if repo_segments.len() == 1 && (!has_registry || registry == DOCKER_HUB) {
        repository = format!("library/{repository}");
    }

    Ok(ImageRef {
        registry,
        repository,
        tag,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(raw: &str) -> String {
        normalize_image(raw, DOCKER_HUB).expect("normalize").reference()
    }

    #[test]
    fn bare_and_namespaced_names_go_to_docker_hub() {
        assert_eq!(normalized("alpine"), "docker.io/library/alpine:latest");
        assert_eq!(normalized("alpine:3.19"), "docker.io/library/alpine:3.19");
        assert_eq!(normalized("lemc/runner"), "docker.io/lemc/runner:latest");
    }

    #[test]
    fn bare_names_get_the_library_namespace_on_any_default_registry() {
        let image = normalize_image("alpine", "registry.example.com").expect("normalize");
        assert_eq!(
            image.reference(),
            "registry.example.com/library/alpine:latest"
        );
        let image = normalize_image("acme/tool:v2", "registry.example.com").expect("normalize");
        assert_eq!(image.reference(), "registry.example.com/acme/tool:v2");
    }

    #[test]
    fn explicit_registries_are_kept() {
        assert_eq!(normalized("ghcr.io/acme/tool:v1"), "ghcr.io/acme/tool:v1");
        assert_eq!(
            normalized("localhost:5000/tool"),
            "localhost:5000/tool:latest"
        );
        assert_eq!(normalized("localhost/tool"), "localhost/tool:latest");
    }

    #[test]
    fn digests_suppress_the_default_tag() {
        assert_eq!(
            normalized("alpine@sha256:abcd"),
            "docker.io/library/alpine@sha256:abcd"
        );
    }

    #[test]
    fn malformed_references_are_rejected() {
        for raw in ["", "  ", "Alpine", "bad image", "alpine:", "a//b", "x@nodigest"] {
            assert!(
                matches!(
                    normalize_image(raw, DOCKER_HUB),
                    Err(DispatchError::InvalidImage { .. })
                ),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn short_hash_is_stable_hex() {
        let image = normalize_image("alpine", DOCKER_HUB).expect("image");
        let hash = image.short_hash();
        assert_eq!(hash.len(), 12);
        assert_eq!(hash, normalize_image("alpine:latest", DOCKER_HUB).expect("same").short_hash());
    }
}
