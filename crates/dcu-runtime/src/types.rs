//! ---
//! dcu_section: "02-runtime-driver"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Value types exchanged with the container runtime."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Borrow the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_newtype!(
    /// Name of a service declared in the compose manifest.
    ServiceName
);

string_newtype!(
    /// Identifier of a running container instance. Never empty.
    ContainerRef
);

string_newtype!(
    /// Content identifier of an image with any `sha256:`-style scheme prefix removed.
    ImageIdentity
);

string_newtype!(
    /// Human addressable `name:tag` reference, normalised the way `docker image ls` prints it.
    ImageReference
);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl From<&str> for ServiceName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ServiceName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl ContainerRef {
    /// Build a reference from raw runtime output; blank output means "no container".
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_owned()))
        }
    }
}

impl ImageIdentity {
    /// Normalise a raw identity (`sha256:abc...` becomes `abc...`). Blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let digest = match trimmed.split_once(':') {
            Some((scheme, rest))
                if !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                rest
            }
            _ => trimmed,
        };
        if digest.is_empty() {
            None
        } else {
            Some(Self(digest.to_owned()))
        }
    }

    /// First twelve characters, matching the short form the docker CLI prints.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

const DEFAULT_REGISTRY_PREFIXES: [&str; 2] = ["docker.io/library/", "docker.io/"];

impl ImageReference {
    /// Normalise a reference: drop the default registry prefix and add the implicit
    /// `latest` tag when neither a tag nor a digest is present.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut reference = raw.trim();
        if reference.is_empty() {
            return None;
        }
        for prefix in DEFAULT_REGISTRY_PREFIXES {
            if let Some(rest) = reference.strip_prefix(prefix) {
                reference = rest;
                break;
            }
        }
        let last_segment = reference.rsplit('/').next().unwrap_or(reference);
        if reference.contains('@') || last_segment.contains(':') {
            Some(Self(reference.to_owned()))
        } else {
            Some(Self(format!("{reference}:latest")))
        }
    }

    /// Join a repository and tag as printed by `docker image ls`. `<none>` parts yield `None`.
    pub fn from_repository_tag(repository: &str, tag: &str) -> Option<Self> {
        if repository.is_empty() || repository == "<none>" || tag.is_empty() || tag == "<none>" {
            return None;
        }
        Self::parse(&format!("{repository}:{tag}"))
    }
}

/// What the runtime reports about a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDescriptor {
    /// Container identifier.
    pub id: ContainerRef,
    /// Identity of the image the container was created from.
    pub image: Option<ImageIdentity>,
}

/// A locally known image and every reference that currently resolves to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub identity: ImageIdentity,
    pub references: BTreeSet<ImageReference>,
}

impl ImageSummary {
    pub fn new(identity: ImageIdentity, references: impl IntoIterator<Item = ImageReference>) -> Self {
        Self {
            identity,
            references: references.into_iter().collect(),
        }
    }
}
