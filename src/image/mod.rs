//! Image model: manifest documents, descriptors and image references

pub mod manifest;
pub mod reference;

pub use manifest::{
    Descriptor, ManifestList, ManifestListEntry, ManifestType, Platform, PlatformManifest,
    ACCEPTED_MEDIA_TYPES,
};
pub use reference::ImageReference;
