//! Builders for the binary formats the decoders read, and small sample artifacts made from them.

mod dex_builder;
mod zip_builder;

pub(crate) use class_builder::ClassBuilder;
pub(crate) use dex_builder::DexBuilder;
pub(crate) use resource_builders::{ArscBuilder, BinaryXmlBuilder, ProtoWriter, StringPoolBuilder};
pub(crate) use zip_builder::{
    pkcs7_signed_data, pkcs7_signed_data_indefinite, scheme_block, signing_block, x509_certificate, ZipBuilder,
};

use crate::android::binary_xml::{TYPE_INT_DEC, TYPE_STRING};
use crate::android::manifest::ANDROID_NAMESPACE_URI;

/// Hex with any whitespace in between.
pub(crate) fn decode_hex(text: &str) -> Vec<u8> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(digits).unwrap()
}

pub(crate) fn minimal_binary_manifest(package: &str, version_code: &str) -> Vec<u8> {
    let mut builder = BinaryXmlBuilder::new();
    builder.start_namespace("android", ANDROID_NAMESPACE_URI);
    builder.start_element(None, "manifest", &[
        (None, "package", TYPE_STRING, package),
        (Some(ANDROID_NAMESPACE_URI), "versionCode", TYPE_INT_DEC, version_code),
    ]);
    builder.end_element(None, "manifest");
    builder.end_namespace("android", ANDROID_NAMESPACE_URI);
    builder.build()
}

/// An aapt2 `XmlNode` manifest. The version code is a compiled integer, as aapt2 writes it.
pub(crate) fn proto_manifest(package: &str, version_code: &str, split: Option<&str>) -> Vec<u8> {
    let attribute = |namespace_uri: Option<&str>, name: &str, value: &str, compiled: Option<Vec<u8>>| {
        let mut writer = ProtoWriter::new();
        if let Some(uri) = namespace_uri {
            writer.string(1, uri);
        }
        writer.string(2, name);
        writer.string(3, value);
        if let Some(item) = compiled {
            writer.message(6, &item);
        }
        writer.finish()
    };

    let mut primitive = ProtoWriter::new();
    primitive.varint(6, version_code.parse().unwrap());
    let mut item = ProtoWriter::new();
    item.message(7, &primitive.finish());

    let mut namespace = ProtoWriter::new();
    namespace.string(1, "android");
    namespace.string(2, ANDROID_NAMESPACE_URI);

    let mut element = ProtoWriter::new();
    element.message(1, &namespace.finish());
    element.string(3, "manifest");
    element.message(4, &attribute(None, "package", package, None));
    element.message(4, &attribute(Some(ANDROID_NAMESPACE_URI), "versionCode", "", Some(item.finish())));
    if let Some(split) = split {
        element.message(4, &attribute(None, "split", split, None));
    }

    let mut node = ProtoWriter::new();
    node.message(1, &element.finish());
    node.finish()
}

pub(crate) fn sample_apk(version_code: &str) -> Vec<u8> {
    sample_apk_with(version_code, false)
}

/// Two dex files, one resource and a dex-named asset that must not be decoded.
pub(crate) fn sample_apk_with(version_code: &str, compress_arsc: bool) -> Vec<u8> {
    let arsc = ArscBuilder::new(0x7f, "com.example.app").entries("string", &[], &["app_name"]).build();
    let builder = ZipBuilder::new().stored("AndroidManifest.xml", &minimal_binary_manifest("com.example.app", version_code));
    let builder = if compress_arsc { builder.deflated("resources.arsc", &arsc) } else { builder.stored("resources.arsc", &arsc) };
    builder
        .deflated("classes.dex", &DexBuilder::new().class("Lcom/example/Main;").build())
        .deflated("classes2.dex", &DexBuilder::new().class("Lcom/example/Other;").build())
        .deflated("assets/classes3.dex", b"not a dex")
        .build()
}

fn jar(classes: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut builder = ZipBuilder::new().stored("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n");
    for (name, bytes) in classes {
        builder = builder.deflated(&format!("{}.class", name), bytes);
    }
    builder.build()
}

/// `classes.jar` holds one class declaring `render` plus `extra_methods`.
pub(crate) fn sample_aar(version_code: &str, extra_methods: &[&str]) -> Vec<u8> {
    let manifest = format!(
        "<manifest xmlns:android=\"{}\" package=\"com.example.lib\" android:versionCode=\"{}\">\n    <uses-sdk android:minSdkVersion=\"21\"/>\n</manifest>\n",
        ANDROID_NAMESPACE_URI, version_code
    );
    let mut widget = ClassBuilder::new("com/example/lib/Widget", 52).method("render", "()V", |code| {
        code.invokestatic("com/example/lib/Helper", "help", "()V");
        code.return_void();
    });
    for method in extra_methods {
        widget = widget.method(method, "()V", |code| code.return_void());
    }
    let helper = ClassBuilder::new("com/example/lib/Helper", 52).method("help", "()V", |code| code.return_void());

    ZipBuilder::new()
        .stored("AndroidManifest.xml", manifest.as_bytes())
        .deflated("classes.jar", &jar(&[("com/example/lib/Widget", widget.build())]))
        .deflated("libs/helper.jar", &jar(&[("com/example/lib/Helper", helper.build())]))
        .deflated("R.txt", b"int string app_name 0x7f010000\n")
        .build()
}

pub(crate) fn sample_aab(version_code: &str, features: &[&str], with_mapping: bool) -> Vec<u8> {
    let mut builder = ZipBuilder::new()
        .stored("BundleConfig.pb", b"")
        .deflated("base/manifest/AndroidManifest.xml", &proto_manifest("com.example.app", version_code, None))
        .deflated("base/dex/classes.dex", &DexBuilder::new().class("Lcom/example/a;").build());
    for feature in features {
        builder = builder.deflated(
            &format!("{}/manifest/AndroidManifest.xml", feature),
            &proto_manifest("com.example.app", version_code, Some(*feature)),
        );
    }
    if with_mapping {
        builder = builder.deflated(
            "BUNDLE-METADATA/com.android.tools.build.obfuscation/proguard.map",
            b"com.example.Main -> com.example.a:\n    void run() -> a\n",
        );
    }
    builder.build()
}
