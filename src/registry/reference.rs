//! Image reference splitting and tag classification.

/// Whether a tag may move under the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagClass {
    /// `latest`, `main`, `master` or no tag at all.
    Dynamic,
    /// Anything else, including digest references.
    Pinned,
}

const DYNAMIC_TAGS: &[&str] = &["latest", "main", "master"];

/// A parsed `[registry/]repository[:tag][@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, when the first path component names one.
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(image: &str) -> Self {
        let (rest, digest) = match image.split_once('@') {
            Some((r, d)) => (r, Some(d.to_string())),
            None => (image, None),
        };

        // A colon after the last slash separates the tag; earlier colons
        // belong to a registry port.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => (
                &rest[..last_slash + i],
                Some(rest[last_slash + i + 1..].to_string()),
            ),
            None => (rest, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), remainder.to_string())
            }
            _ => (None, name.to_string()),
        };

        Self {
            registry,
            repository,
            tag,
            digest,
        }
    }

    /// Reference without tag or digest.
    pub fn base(&self) -> String {
        match &self.registry {
            Some(r) => format!("{}/{}", r, self.repository),
            None => self.repository.clone(),
        }
    }

    /// Tag to pull, defaulting to `latest` like the Docker CLI.
    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    pub fn tag_class(&self) -> TagClass {
        if self.digest.is_some() {
            return TagClass::Pinned;
        }
        match self.tag.as_deref() {
            None => TagClass::Dynamic,
            Some(t) if DYNAMIC_TAGS.contains(&t) => TagClass::Dynamic,
            Some(_) => TagClass::Pinned,
        }
    }
}

/// Split into `(base, tag)`; the tag is `None` when absent.
pub fn split_image_reference(image: &str) -> (String, Option<String>) {
    let reference = ImageReference::parse(image);
    (reference.base(), reference.tag)
}

/// True for `latest`, `main`, `master` or an implicit tag.
pub fn has_latest_tag(image: &str) -> bool {
    ImageReference::parse(image).tag_class() == TagClass::Dynamic
}
