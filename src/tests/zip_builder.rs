use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
const EOCD_SIGNATURE: u32 = 0x06054b50;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
// 1980-01-01
const DOS_DATE: u16 = 0x0021;
const ALIGNMENT_EXTRA_ID: u16 = 0xd935;

struct Entry {
    name: String,
    method: u16,
    crc: u32,
    uncompressed_size: u32,
    data: Vec<u8>,
    local_extra: Vec<u8>,
    central_extra: Vec<u8>,
}

/// Writes ZIP files entry by entry, optionally with an APK Signing Block before the central directory.
#[derive(Default)]
pub(crate) struct ZipBuilder {
    entries: Vec<Entry>,
    signing_block: Option<Vec<u8>>,
}

/// A well formed extra field of exactly `length` bytes.
fn padding_extra(length: usize) -> Vec<u8> {
    if length == 0 {
        return vec![];
    }
    assert!(length >= 4, "extra fields need a 4 byte header");
    let mut extra = ALIGNMENT_EXTRA_ID.to_le_bytes().to_vec();
    extra.extend_from_slice(&((length - 4) as u16).to_le_bytes());
    extra.resize(length, 0);
    extra
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

impl ZipBuilder {
    pub(crate) fn new() -> ZipBuilder {
        ZipBuilder::default()
    }

    fn entry(mut self, name: &str, method: u16, data: &[u8], local_extra: usize, central_extra: usize) -> ZipBuilder {
        let stored = if method == METHOD_DEFLATED {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        } else {
            data.to_vec()
        };
        self.entries.push(Entry {
            name: name.to_string(),
            method,
            crc: crc32fast::hash(data),
            uncompressed_size: data.len() as u32,
            data: stored,
            local_extra: padding_extra(local_extra),
            central_extra: padding_extra(central_extra),
        });
        self
    }

    pub(crate) fn stored(self, name: &str, data: &[u8]) -> ZipBuilder {
        self.entry(name, METHOD_STORED, data, 0, 0)
    }

    pub(crate) fn deflated(self, name: &str, data: &[u8]) -> ZipBuilder {
        self.entry(name, METHOD_DEFLATED, data, 0, 0)
    }

    /// Stored, with extra fields of the given lengths in the local and central headers.
    pub(crate) fn stored_with_extra(self, name: &str, data: &[u8], local_extra: usize, central_extra: usize) -> ZipBuilder {
        self.entry(name, METHOD_STORED, data, local_extra, central_extra)
    }

    pub(crate) fn signing_block(mut self, block: Vec<u8>) -> ZipBuilder {
        self.signing_block = Some(block);
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut out = vec![];
        let mut local_offsets = vec![];
        for entry in &self.entries {
            local_offsets.push(out.len() as u32);
            push_u32(&mut out, LOCAL_HEADER_SIGNATURE);
            push_u16(&mut out, 20); // version needed
            push_u16(&mut out, 0); // flags
            push_u16(&mut out, entry.method);
            push_u16(&mut out, 0); // time
            push_u16(&mut out, DOS_DATE);
            push_u32(&mut out, entry.crc);
            push_u32(&mut out, entry.data.len() as u32);
            push_u32(&mut out, entry.uncompressed_size);
            push_u16(&mut out, entry.name.len() as u16);
            push_u16(&mut out, entry.local_extra.len() as u16);
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&entry.local_extra);
            out.extend_from_slice(&entry.data);
        }

        if let Some(block) = &self.signing_block {
            out.extend_from_slice(block);
        }

        let central_directory_offset = out.len() as u32;
        for (entry, local_offset) in self.entries.iter().zip(local_offsets) {
            push_u32(&mut out, CENTRAL_HEADER_SIGNATURE);
            push_u16(&mut out, 20); // version made by
            push_u16(&mut out, 20); // version needed
            push_u16(&mut out, 0);
            push_u16(&mut out, entry.method);
            push_u16(&mut out, 0);
            push_u16(&mut out, DOS_DATE);
            push_u32(&mut out, entry.crc);
            push_u32(&mut out, entry.data.len() as u32);
            push_u32(&mut out, entry.uncompressed_size);
            push_u16(&mut out, entry.name.len() as u16);
            push_u16(&mut out, entry.central_extra.len() as u16);
            push_u16(&mut out, 0); // comment
            push_u16(&mut out, 0); // disk
            push_u16(&mut out, 0); // internal attributes
            push_u32(&mut out, 0); // external attributes
            push_u32(&mut out, local_offset);
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&entry.central_extra);
        }
        let central_directory_size = out.len() as u32 - central_directory_offset;

        push_u32(&mut out, EOCD_SIGNATURE);
        push_u16(&mut out, 0);
        push_u16(&mut out, 0);
        push_u16(&mut out, self.entries.len() as u16);
        push_u16(&mut out, self.entries.len() as u16);
        push_u32(&mut out, central_directory_size);
        push_u32(&mut out, central_directory_offset);
        push_u16(&mut out, 0); // comment
        out
    }
}

/// A DER element, long form lengths from 128 bytes on.
pub(crate) fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let length = content.len();
    if length < 0x80 {
        out.push(length as u8);
    } else {
        let bytes: Vec<u8> = length.to_be_bytes().iter().copied().skip_while(|b| *b == 0).collect();
        out.push(0x80 | bytes.len() as u8);
        out.extend(bytes);
    }
    out.extend_from_slice(content);
    out
}

const SHA256_WITH_RSA_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];
const RSA_ENCRYPTION_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
const COMMON_NAME_OID: [u8; 3] = [0x55, 0x04, 0x03];

fn algorithm(oid: &[u8]) -> Vec<u8> {
    der(0x30, &[der(0x06, oid), der(0x05, &[])].concat())
}

/// A structurally valid, unsigned X.509 v3 certificate for `CN=diffuse`. `serial` stays below 0x80.
pub(crate) fn x509_certificate(serial: u8) -> Vec<u8> {
    let name = der(0x30, &der(0x31, &der(0x30, &[der(0x06, &COMMON_NAME_OID), der(0x0c, b"diffuse")].concat())));
    let validity = der(0x30, &[der(0x17, b"250101000000Z"), der(0x17, b"350101000000Z")].concat());
    let public_key = der(0x30, &[algorithm(&RSA_ENCRYPTION_OID), der(0x03, &[0x00, 0x30, 0x00])].concat());
    let tbs = der(
        0x30,
        &[
            der(0xa0, &der(0x02, &[2])),
            der(0x02, &[serial]),
            algorithm(&SHA256_WITH_RSA_OID),
            name.clone(),
            validity,
            name,
            public_key,
        ]
        .concat(),
    );
    der(0x30, &[tbs, algorithm(&SHA256_WITH_RSA_OID), der(0x03, &[0x00, serial, 0xff])].concat())
}

/// A BER constructed element with indefinite length.
fn indefinite(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag, 0x80];
    out.extend_from_slice(content);
    out.extend_from_slice(&[0, 0]);
    out
}

fn pkcs7(certificates: &[Vec<u8>], wrap: fn(u8, &[u8]) -> Vec<u8>) -> Vec<u8> {
    const SIGNED_DATA_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
    const DATA_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01];
    let signed_data = wrap(
        0x30,
        &[
            der(0x02, &[1]),
            der(0x31, &[]),
            der(0x30, &der(0x06, &DATA_OID)),
            wrap(0xa0, &certificates.concat()),
            der(0x31, &[]),
        ]
        .concat(),
    );
    wrap(0x30, &[der(0x06, &SIGNED_DATA_OID), wrap(0xa0, &signed_data)].concat())
}

/// A PKCS#7 ContentInfo wrapping SignedData with the given certificates and no signers.
pub(crate) fn pkcs7_signed_data(certificates: &[Vec<u8>]) -> Vec<u8> {
    pkcs7(certificates, der)
}

/// Like [`pkcs7_signed_data`], with indefinite lengths on every constructed wrapper.
pub(crate) fn pkcs7_signed_data_indefinite(certificates: &[Vec<u8>]) -> Vec<u8> {
    pkcs7(certificates, indefinite)
}

fn length_prefixed(content: &[u8]) -> Vec<u8> {
    let mut out = (content.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(content);
    out
}

/// A v2 or v3 scheme block value with one signer per certificate.
pub(crate) fn scheme_block(certificates: &[Vec<u8>]) -> Vec<u8> {
    let mut signers = vec![];
    for certificate in certificates {
        let signed_data = [
            length_prefixed(&[]), // digests
            length_prefixed(&length_prefixed(certificate)),
            length_prefixed(&[]), // additional attributes
        ]
        .concat();
        let signer = [length_prefixed(&signed_data), length_prefixed(&[]), length_prefixed(b"public key")].concat();
        signers.extend(length_prefixed(&signer));
    }
    length_prefixed(&signers)
}

/// A complete APK Signing Block holding `pairs`.
pub(crate) fn signing_block(pairs: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut body = vec![];
    for (id, value) in pairs {
        body.extend_from_slice(&(4 + value.len() as u64).to_le_bytes());
        body.extend_from_slice(&id.to_le_bytes());
        body.extend_from_slice(value);
    }
    let size = (body.len() + 8 + 16) as u64;
    let mut block = size.to_le_bytes().to_vec();
    block.extend(body);
    block.extend_from_slice(&size.to_le_bytes());
    block.extend_from_slice(b"APK Sig Block 42");
    block
}
