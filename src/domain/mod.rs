//! Domain types shared by discovery, packaging and storage

mod package;

pub use package::{object_key, ChartDir, PackageDescriptor, PackageFile, Payload};
