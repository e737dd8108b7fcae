//! Extension loaders for the wire-level capabilities.
//!
//! Tag-based lookup lives in `parallax-proto` (the hot decode path);
//! name-based lookup for configuration goes through these loaders.

use parallax_proto::compress::{
    Compressor, GzipCompressor, Lz4Compressor, NoneCompressor, SnappyCompressor,
};
use parallax_proto::serialize::{BinarySerializer, CborSerializer, JsonSerializer, Serializer};

use crate::extension::ExtensionLoader;
use crate::extension_factories;

/// Descriptor resource for the serializer capability.
pub const SERIALIZER_DESCRIPTOR: &str = include_str!("../descriptors/serializer.extension");

/// Descriptor resource for the compressor capability.
pub const COMPRESSOR_DESCRIPTOR: &str = include_str!("../descriptors/compressor.extension");

/// Builds the extension loader for the built-in serializers.
pub fn serializer_loader() -> ExtensionLoader<dyn Serializer> {
    let factories = extension_factories!(dyn Serializer;
        "serialize::JsonSerializer" => JsonSerializer,
        "serialize::CborSerializer" => CborSerializer,
        "serialize::BinarySerializer" => BinarySerializer,
    );
    ExtensionLoader::from_descriptor(SERIALIZER_DESCRIPTOR, factories)
        .unwrap_or_else(|e| unreachable!("embedded serializer descriptor is valid: {e}"))
}

/// Builds the extension loader for the built-in compressors.
pub fn compressor_loader() -> ExtensionLoader<dyn Compressor> {
    let factories = extension_factories!(dyn Compressor;
        "compress::NoneCompressor" => NoneCompressor,
        "compress::GzipCompressor" => GzipCompressor,
        "compress::SnappyCompressor" => SnappyCompressor,
        "compress::Lz4Compressor" => Lz4Compressor,
    );
    ExtensionLoader::from_descriptor(COMPRESSOR_DESCRIPTOR, factories)
        .unwrap_or_else(|e| unreachable!("embedded compressor descriptor is valid: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializer_names_and_tags_line_up() {
        let loader = serializer_loader();
        assert_eq!(loader.names(), vec!["json", "cbor", "binary"]);
        assert_eq!(loader.get("json").unwrap().tag(), 1);
        assert_eq!(loader.get("cbor").unwrap().tag(), 2);
        assert_eq!(loader.get("binary").unwrap().tag(), 3);
        assert_eq!(loader.get_default().unwrap().name(), "json");
    }

    #[test]
    fn compressor_names_and_tags_line_up() {
        let loader = compressor_loader();
        assert_eq!(loader.names(), vec!["none", "gzip", "snappy", "lz4"]);
        assert_eq!(loader.get("none").unwrap().tag(), 0);
        assert_eq!(loader.get("gzip").unwrap().tag(), 1);
        assert_eq!(loader.get("snappy").unwrap().tag(), 2);
        assert_eq!(loader.get("lz4").unwrap().tag(), 3);
        assert_eq!(loader.get_default().unwrap().name(), "none");
    }

    #[test]
    fn unknown_names_fail() {
        assert!(serializer_loader().get("xml").is_err());
        assert!(compressor_loader().get("zstd").is_err());
    }
}
