//! Image references and builder image descriptors.

use serde::{Deserialize, Serialize};

use crate::error::{ComposeError, Result};

/// Container image reference, in repository/tag or digest form.
///
/// Only non-emptiness is checked; the container runtime is the authority on
/// whether a reference resolves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageReference(String);

impl ImageReference {
    pub fn new(reference: impl Into<String>) -> Result<Self> {
        let reference = reference.into();
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(ComposeError::ConfigError(
                "Empty image reference".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn reference(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ImageReference {
    type Err = ComposeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ImageReference {
    type Error = ComposeError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ImageReference> for String {
    fn from(value: ImageReference) -> Self {
        value.0
    }
}

impl AsRef<str> for ImageReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A buildpack builder image.
///
/// A base descriptor names an existing builder image and the uid/gid its
/// lifecycle runs as. An assembled descriptor additionally carries the image
/// committed after lifecycle, extension and buildpack modules were overlaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderImage {
    /// The builder image the descriptor was created from
    image: ImageReference,

    /// User id owning the builder's working directories
    user_id: u32,

    /// Group id owning the builder's working directories
    group_id: u32,

    /// Run images advertised by the builder
    #[serde(default)]
    run_images: Vec<ImageReference>,

    /// Whether image extensions were overlaid
    #[serde(default)]
    has_extensions: bool,

    /// Committed image of an assembled builder
    #[serde(default)]
    ephemeral_image: Option<ImageReference>,
}

impl BuilderImage {
    /// Describe an existing builder image.
    pub fn new(image: ImageReference, user_id: u32, group_id: u32) -> Self {
        Self {
            image,
            user_id,
            group_id,
            run_images: Vec::new(),
            has_extensions: false,
            ephemeral_image: None,
        }
    }

    pub fn with_run_images(mut self, run_images: Vec<ImageReference>) -> Self {
        self.run_images = run_images;
        self
    }

    /// Descriptor for a builder assembled on top of `base`.
    ///
    /// Called by the builder assembler once the overlay container is committed.
    pub fn assembled(base: &BuilderImage, has_extensions: bool, committed: ImageReference) -> Self {
        Self {
            image: base.image.clone(),
            user_id: base.user_id,
            group_id: base.group_id,
            run_images: base.run_images.clone(),
            has_extensions,
            ephemeral_image: Some(committed),
        }
    }

    pub fn image(&self) -> &ImageReference {
        &self.image
    }

    pub fn user_id(&self) -> u32 {
        self.user_id
    }

    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    pub fn run_images(&self) -> &[ImageReference] {
        &self.run_images
    }

    pub fn has_extensions(&self) -> bool {
        self.has_extensions
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_image.is_some()
    }

    /// Image lifecycle phase containers are created from.
    pub fn image_for_phases(&self) -> &ImageReference {
        self.ephemeral_image.as_ref().unwrap_or(&self.image)
    }
}
