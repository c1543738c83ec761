//! Core types shared between the engine and its caller

mod device;
mod metadata;

pub use device::{AudioQuality, Device, DeviceState, DeviceType, MetadataMask};
pub use metadata::{Artwork, ArtworkFormat, Progress, TrackMetadata};

#[cfg(test)]
mod tests;
