//! Decoders for the Android container and resource formats.

pub mod archive_files;
pub mod arsc;
pub(crate) mod binary_xml;
pub mod chunk;
pub mod manifest;
pub(crate) mod proto_xml;
pub mod signatures;
pub mod zip;
