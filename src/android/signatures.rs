/* APK signer certificates for every signature scheme version */

use crate::android::zip::{Archive, Zip};
use crate::error::{DiffuseError, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use rasn_cms::{CertificateChoices, ContentInfo, SignedData};
use rasn_pkix::Certificate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::borrow::Borrow;

const EOCD_SIGNATURE: u32 = 0x06054b50;
const EOCD_SIZE: usize = 22;
const ZIP64_EOCD_LOCATOR_SIGNATURE: u32 = 0x07064b50;
const ZIP64_EOCD_SIGNATURE: u32 = 0x06064b50;
const SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

pub const APK_SIGNATURE_SCHEME_V2_ID: u32 = 0x7109871a;
pub const APK_SIGNATURE_SCHEME_V3_ID: u32 = 0xf05368c0;

// 1.2.840.113549.1.7.2
const SIGNED_DATA_OID: [u32; 7] = [1, 2, 840, 113549, 1, 7, 2];

/// Lowercase hex SHA-256 fingerprints of signer certificates, sorted, per scheme version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Signatures {
    pub v1: Vec<String>,
    pub v2: Vec<String>,
    pub v3: Vec<String>,
    pub v4: Vec<String>,
}

impl Signatures {
    /// v1 through v3, all of which live inside the APK itself.
    pub fn from_apk(zip: &Zip) -> Result<Signatures> {
        let mut signatures = Signatures::default();

        for entry in zip.entries() {
            if is_v1_signature_file(&entry.path) {
                let pkcs7 = zip.read(&entry.path)?;
                if let Some(certificate) = pkcs7_first_certificate(&pkcs7).map_err(|e| e.in_artifact(entry.path.as_str()))? {
                    signatures.v1.push(fingerprint(&certificate));
                }
            }
        }

        if let Some(pairs) = signing_block(zip.data())? {
            let mut reader = BlockReader::new(pairs);
            while !reader.is_empty() {
                let length = reader.u64()?;
                if length < 4 || length > reader.remaining() as u64 {
                    return malformed(format!("Signing block pair length {} out of range", length));
                }
                let id = reader.u32()?;
                let value = reader.bytes(length as usize - 4)?;
                match id {
                    APK_SIGNATURE_SCHEME_V2_ID => signatures.v2.extend(scheme_certificates(value)?),
                    APK_SIGNATURE_SCHEME_V3_ID => signatures.v3.extend(scheme_certificates(value)?),
                    _ => debug!("Skipping signing block pair {:#010x}", id),
                }
            }
        }

        signatures.sort();
        debug!(
            "Signatures of {}: v1={} v2={} v3={}",
            zip.name(),
            signatures.v1.len(),
            signatures.v2.len(),
            signatures.v3.len()
        );
        Ok(signatures)
    }

    /// Adds the signer of a v4 `.idsig` file.
    pub fn with_v4(mut self, idsig: &[u8]) -> Result<Signatures> {
        let mut reader = BlockReader::new(idsig);
        let version = reader.u32()?;
        reader.length_prefixed()?; // hashing info
        let signing_info = reader.length_prefixed()?;
        debug!("v4 signature version {}", version);

        let mut signing_info = BlockReader::new(signing_info);
        signing_info.length_prefixed()?; // apk digest
        let certificate = signing_info.length_prefixed()?;
        self.v4.push(fingerprint(certificate));
        self.sort();
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.v1.is_empty() && self.v2.is_empty() && self.v3.is_empty() && self.v4.is_empty()
    }

    fn sort(&mut self) {
        self.v1.sort();
        self.v2.sort();
        self.v3.sort();
        self.v4.sort();
    }
}

pub fn fingerprint(certificate: &[u8]) -> String {
    hex::encode(Sha256::digest(certificate))
}

fn malformed<T>(msg: impl Into<String>) -> Result<T> {
    Err(DiffuseError::Signature(msg.into()))
}

fn is_v1_signature_file(path: &str) -> bool {
    match path.strip_prefix("META-INF/") {
        Some(name) if !name.contains('/') => {
            let upper = name.to_ascii_uppercase();
            upper.ends_with(".RSA") || upper.ends_with(".DSA") || upper.ends_with(".EC")
        }
        _ => false,
    }
}

/// Little-endian reader for the length-prefixed structures of the signing block.
struct BlockReader<'a> {
    data: &'a [u8],
}

impl<'a> BlockReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BlockReader { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn remaining(&self) -> usize {
        self.data.len()
    }

    fn bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        if length > self.data.len() {
            return malformed(format!("Needed {} bytes but only {} remain", length, self.data.len()));
        }
        let (head, tail) = self.data.split_at(length);
        self.data = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    fn length_prefixed(&mut self) -> Result<&'a [u8]> {
        let length = self.u32()? as usize;
        self.bytes(length)
    }
}

fn find_eocd(data: &[u8]) -> Option<usize> {
    if data.len() < EOCD_SIZE {
        return None;
    }
    let last = data.len() - EOCD_SIZE;
    let first = last.saturating_sub(u16::MAX as usize);
    (first..=last).rev().find(|&offset| {
        LittleEndian::read_u32(&data[offset..]) == EOCD_SIGNATURE
            && offset + EOCD_SIZE + LittleEndian::read_u16(&data[offset + 20..]) as usize == data.len()
    })
}

fn central_directory_offset(data: &[u8]) -> Option<usize> {
    let eocd = find_eocd(data)?;
    let offset = LittleEndian::read_u32(&data[eocd + 16..]);
    if offset != u32::MAX {
        return Some(offset as usize);
    }

    let locator = eocd.checked_sub(20).filter(|&at| LittleEndian::read_u32(&data[at..]) == ZIP64_EOCD_LOCATOR_SIGNATURE);
    let Some(locator) = locator else {
        warn!("ZIP64 end of central directory without a locator");
        return None;
    };
    let zip64_eocd = LittleEndian::read_u64(&data[locator + 8..]) as usize;
    match zip64_eocd.checked_add(56).and_then(|end| data.get(zip64_eocd..end)) {
        Some(record) if LittleEndian::read_u32(record) == ZIP64_EOCD_SIGNATURE => Some(LittleEndian::read_u64(&record[48..]) as usize),
        _ => {
            warn!("ZIP64 end of central directory record not found at {}", zip64_eocd);
            None
        }
    }
}

/// The id-value pairs of the APK Signing Block, when there is one before the central directory.
fn signing_block(data: &[u8]) -> Result<Option<&[u8]>> {
    let Some(cd_offset) = central_directory_offset(data) else { return Ok(None) };
    if cd_offset < 32 || cd_offset > data.len() || &data[cd_offset - 16..cd_offset] != SIGNING_BLOCK_MAGIC {
        return Ok(None);
    }
    let footer_size = LittleEndian::read_u64(&data[cd_offset - 24..]);
    let total = footer_size.checked_add(8).filter(|total| *total <= cd_offset as u64 && footer_size >= 24);
    let Some(total) = total else {
        return malformed(format!("APK Signing Block size {} out of range", footer_size));
    };
    let start = cd_offset - total as usize;
    let header_size = LittleEndian::read_u64(&data[start..]);
    if header_size != footer_size {
        return malformed(format!("APK Signing Block sizes differ: {} and {}", header_size, footer_size));
    }
    Ok(Some(&data[start + 8..cd_offset - 24]))
}

/// First certificate of every signer in a v2 or v3 scheme block. Both lead each signer's
/// signed data with digests then certificates.
fn scheme_certificates(block: &[u8]) -> Result<Vec<String>> {
    let mut fingerprints = Vec::new();
    let mut signers = BlockReader::new(BlockReader::new(block).length_prefixed()?);
    while !signers.is_empty() {
        let mut signer = BlockReader::new(signers.length_prefixed()?);
        let mut signed_data = BlockReader::new(signer.length_prefixed()?);
        signed_data.length_prefixed()?; // digests
        let mut certificates = BlockReader::new(signed_data.length_prefixed()?);
        if certificates.is_empty() {
            return malformed("Signer without certificates");
        }
        fingerprints.push(fingerprint(certificates.length_prefixed()?));
    }
    Ok(fingerprints)
}

/// The first entry of the `certificates` set of a PKCS#7 SignedData, DER encoded, if any.
/// BER encodings such as indefinite lengths are accepted.
fn pkcs7_first_certificate(ber: &[u8]) -> Result<Option<Vec<u8>>> {
    let content_info = rasn::ber::decode::<ContentInfo>(ber)
        .map_err(|err| DiffuseError::Signature(format!("Invalid PKCS#7 ContentInfo: {}", err)))?;
    let content_type: &[u32] = &content_info.content_type;
    if content_type != &SIGNED_DATA_OID[..] {
        return malformed(format!("Expected PKCS#7 SignedData but found content type {:?}", content_type));
    }
    let signed_data = rasn::ber::decode::<SignedData>(content_info.content.as_bytes())
        .map_err(|err| DiffuseError::Signature(format!("Invalid PKCS#7 SignedData: {}", err)))?;

    let first = signed_data.certificates.iter().flatten().find_map(|choice| match choice {
        CertificateChoices::Certificate(certificate) => Some(certificate),
        _ => None,
    });
    let Some(certificate) = first else { return Ok(None) };
    let certificate: &Certificate = certificate.borrow();
    let encoded = rasn::der::encode(certificate)
        .map_err(|err| DiffuseError::Signature(format!("Unable to encode signer certificate: {}", err)))?;
    Ok(Some(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tests::{
        pkcs7_signed_data, pkcs7_signed_data_indefinite, scheme_block, signing_block as build_signing_block, x509_certificate,
        ZipBuilder,
    };

    #[test]
    fn test_unsigned() {
        let zip = Zip::from_bytes("app.apk", ZipBuilder::new().stored("classes.dex", b"dex").build()).unwrap();
        let signatures = Signatures::from_apk(&zip).unwrap();
        assert!(signatures.is_empty());
    }

    #[test]
    fn test_v1() {
        let bytes = ZipBuilder::new()
            .stored("META-INF/CERT.RSA", &pkcs7_signed_data(&[x509_certificate(2)]))
            .stored("META-INF/OTHER.ec", &pkcs7_signed_data(&[x509_certificate(1)]))
            .stored("META-INF/EMPTY.DSA", &pkcs7_signed_data(&[]))
            .stored("META-INF/nested/IGNORED.RSA", b"not der")
            .stored("META-INF/CERT.SF", b"Signature-Version: 1.0")
            .build();
        let zip = Zip::from_bytes("app.apk", bytes).unwrap();
        let signatures = Signatures::from_apk(&zip).unwrap();
        let mut expected = vec![fingerprint(&x509_certificate(2)), fingerprint(&x509_certificate(1))];
        expected.sort();
        assert_eq!(signatures.v1, expected);
        assert!(signatures.v2.is_empty());
    }

    #[test]
    fn test_v1_indefinite_lengths() {
        let certificate = x509_certificate(5);
        let pkcs7 = pkcs7_signed_data_indefinite(&[certificate.clone()]);
        assert_eq!(&pkcs7[..2], &[0x30, 0x80]);
        assert_eq!(pkcs7_first_certificate(&pkcs7).unwrap(), Some(certificate.clone()));

        let bytes = ZipBuilder::new().stored("META-INF/CERT.RSA", &pkcs7).build();
        let zip = Zip::from_bytes("app.apk", bytes).unwrap();
        assert_eq!(Signatures::from_apk(&zip).unwrap().v1, vec![fingerprint(&certificate)]);
    }

    #[test]
    fn test_v1_malformed() {
        let bytes = ZipBuilder::new().stored("META-INF/CERT.RSA", b"\x30\x03\x02\x01").build();
        let zip = Zip::from_bytes("app.apk", bytes).unwrap();
        let e = Signatures::from_apk(&zip).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Malformed);
        assert!(e.to_string().starts_with("META-INF/CERT.RSA: "), "{}", e);
    }

    #[test]
    fn test_v2_and_v3() {
        let block = build_signing_block(&[
            (APK_SIGNATURE_SCHEME_V2_ID, scheme_block(&[x509_certificate(7)])),
            (0x42726577, vec![0; 12]),
            (APK_SIGNATURE_SCHEME_V3_ID, scheme_block(&[x509_certificate(8), x509_certificate(9)])),
        ]);
        let bytes = ZipBuilder::new().stored("classes.dex", b"dex").signing_block(block).build();
        let zip = Zip::from_bytes("app.apk", bytes).unwrap();
        let signatures = Signatures::from_apk(&zip).unwrap();
        assert_eq!(signatures.v2, vec![fingerprint(&x509_certificate(7))]);
        let mut v3 = vec![fingerprint(&x509_certificate(8)), fingerprint(&x509_certificate(9))];
        v3.sort();
        assert_eq!(signatures.v3, v3);
        assert_eq!(signatures.v2[0].len(), 64);
        assert!(signatures.v2[0].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_broken_block() {
        let mut block = build_signing_block(&[(APK_SIGNATURE_SCHEME_V2_ID, scheme_block(&[x509_certificate(7)]))]);
        // Corrupt the leading size so it no longer matches the footer
        block[0] ^= 0xff;
        let bytes = ZipBuilder::new().stored("classes.dex", b"dex").signing_block(block).build();
        let zip = Zip::from_bytes("app.apk", bytes).unwrap();
        assert_eq!(Signatures::from_apk(&zip).unwrap_err().kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_zip64_locator_past_end() {
        let mut data = ZIP64_EOCD_LOCATOR_SIGNATURE.to_le_bytes().to_vec();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        // End of central directory with a ZIP64 central directory offset
        data.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&[0; 12]);
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        assert_eq!(find_eocd(&data), Some(20));
        assert_eq!(central_directory_offset(&data), None);
        assert_eq!(signing_block(&data).unwrap(), None);
    }

    #[test]
    fn test_v4() {
        let cert = x509_certificate(4);
        let mut signing_info = Vec::new();
        for field in [&b"digest"[..], &cert[..], &[][..], &b"key"[..]] {
            signing_info.extend_from_slice(&(field.len() as u32).to_le_bytes());
            signing_info.extend_from_slice(field);
        }
        let mut idsig = 2u32.to_le_bytes().to_vec();
        idsig.extend_from_slice(&4u32.to_le_bytes());
        idsig.extend_from_slice(b"hash");
        idsig.extend_from_slice(&(signing_info.len() as u32).to_le_bytes());
        idsig.extend_from_slice(&signing_info);

        let signatures = Signatures::default().with_v4(&idsig).unwrap();
        assert_eq!(signatures.v4, vec![fingerprint(&cert)]);
        assert!(Signatures::default().with_v4(&idsig[..10]).is_err());
    }
}
