//! ClientHello decoding.
//!
//! Only the prefix needed by the policy is decoded: record header, handshake
//! header, client version, random, session id and the cipher suite list.
//! Compression methods and extensions are left untouched.

use crate::error::ParseError;
use crate::hex::HexValue;
use crate::policy::{CipherSuite, CipherSuiteRegistry, ProtocolVersion, TLS_FALLBACK_SCSV};

pub const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
pub const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

/// TLS record header length: content type, version, length.
pub const RECORD_HEADER_LEN: usize = 5;

/// Largest plaintext record payload a peer may send.
pub const MAX_RECORD_LEN: usize = 16 * 1024;

const RANDOM_LEN: usize = 32;

/// What the policy needs from a ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedClientHello {
    pub record_version: HexValue,
    pub handshake_version: HexValue,
    pub cipher_suites: Vec<CipherSuite>,
    pub fallback_scsv_offered: bool,
}

impl ParsedClientHello {
    /// Versions the client would accept, newest first.
    ///
    /// Derived from the single version field, which is the highest version
    /// the client speaks; see [`ProtocolVersion::at_or_below`].
    pub fn supported_protocols(&self) -> Vec<ProtocolVersion> {
        ProtocolVersion::at_or_below(&self.handshake_version)
    }

    pub fn offers(&self, hex: &HexValue) -> bool {
        self.cipher_suites.iter().any(|s| &s.hex == hex)
    }
}

/// Cheap check on the first six bytes: handshake content type, one of the
/// known record versions and the ClientHello handshake type.
///
/// Never panics, whatever the input.
pub fn is_client_hello(bytes: &[u8]) -> bool {
    if bytes.len() < 6 {
        return false;
    }
    let record_version = u16::from_be_bytes([bytes[1], bytes[2]]);
    bytes[0] == CONTENT_TYPE_HANDSHAKE
        && ProtocolVersion::from_wire(record_version).is_some()
        && bytes[5] == HANDSHAKE_TYPE_CLIENT_HELLO
}

/// Total length of the record at the start of `bytes`, header included, if the
/// header is present.
pub fn record_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < RECORD_HEADER_LEN {
        return None;
    }
    Some(RECORD_HEADER_LEN + usize::from(u16::from_be_bytes([bytes[3], bytes[4]])))
}

/// Decodes a ClientHello, resolving every offered suite through `registry`.
///
/// Suites the registry does not know are registered there as `MUST_NOT_BE`.
pub fn parse(bytes: &[u8], registry: &CipherSuiteRegistry) -> Result<ParsedClientHello, ParseError> {
    if !is_client_hello(bytes) {
        return Err(ParseError::NotClientHello);
    }

    let mut cursor = Cursor::new(bytes);

    cursor.take("content type", 1)?;
    let record_version = HexValue::from_bytes(cursor.take("record version", 2)?);
    cursor.take("record length", 2)?;

    cursor.take("handshake type", 1)?;
    cursor.take("handshake length", 3)?;
    let handshake_version = HexValue::from_bytes(cursor.take("handshake version", 2)?);
    cursor.take("random", RANDOM_LEN)?;

    let session_id_len = usize::from(cursor.take("session id length", 1)?[0]);
    cursor.take("session id", session_id_len)?;

    let suites_len = cursor.take_u16("cipher suites length")?;
    if suites_len % 2 != 0 {
        return Err(ParseError::OddCipherSuiteLength(suites_len));
    }
    let suites_block = cursor.take("cipher suites", suites_len)?;

    let fallback = HexValue::from_u16(TLS_FALLBACK_SCSV);
    let mut fallback_scsv_offered = false;
    let mut cipher_suites = Vec::with_capacity(suites_len / 2);
    for pair in suites_block.chunks_exact(2) {
        let hex = HexValue::from_bytes(pair);
        if hex == fallback {
            fallback_scsv_offered = true;
        }
        cipher_suites.push(registry.get_or_create_default(&hex));
    }

    Ok(ParsedClientHello {
        record_version,
        handshake_version,
        cipher_suites,
        fallback_scsv_offered,
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ParseError::Truncated {
                field,
                offset: self.offset,
                needed: len,
                available: self.bytes.len(),
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_u16(&mut self, field: &'static str) -> Result<usize, ParseError> {
        let raw = self.take(field, 2)?;
        Ok(usize::from(u16::from_be_bytes([raw[0], raw[1]])))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::policy::Mode;
    use proptest::prelude::*;

    /// ClientHello as captured from a TLS 1.2 client, cut after the cipher
    /// suite list and the start of the compression methods.
    pub(crate) const SAMPLE_CLIENT_HELLO: &str = concat!(
        "160301", "00c4",
        "01", "0000c0",
        "0303",
        "5b6a1e0a9f2c7d0e4c3b2a1908f7e6d5c4b3a29180706f5e4d3c2b1a09f8e7d6",
        "00",
        "0020",
        "c02bc02fc02cc030cca9cca8c013c014009c009d002f0035000a00ff5600c009",
        "0100"
    );

    pub(crate) fn sample_bytes() -> Vec<u8> {
        hex::decode(SAMPLE_CLIENT_HELLO).unwrap()
    }

    /// Builds a minimal ClientHello offering `suites`.
    pub(crate) fn build_client_hello(version: u16, session_id: &[u8], suites: &[u16]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&version.to_be_bytes());
        body.extend_from_slice(&[0x42; 32]);
        body.push(session_id.len() as u8);
        body.extend_from_slice(session_id);
        body.extend_from_slice(&((suites.len() * 2) as u16).to_be_bytes());
        for suite in suites {
            body.extend_from_slice(&suite.to_be_bytes());
        }
        body.extend_from_slice(&[0x01, 0x00]);

        let mut handshake = vec![HANDSHAKE_TYPE_CLIENT_HELLO];
        handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&body);

        let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn sample_is_recognised_and_parsed() {
        let bytes = sample_bytes();
        assert!(is_client_hello(&bytes));

        let registry = CipherSuiteRegistry::new();
        let hello = parse(&bytes, &registry).unwrap();
        assert_eq!(hello.handshake_version.to_string(), "0303");
        assert_eq!(hello.record_version.to_string(), "0301");
        assert_eq!(hello.cipher_suites[0].hex.to_string(), "c02b");
        assert_eq!(hello.cipher_suites[1].hex.to_string(), "c02f");
        assert_eq!(hello.cipher_suites.len(), 16);
        assert!(hello.fallback_scsv_offered);
        assert_eq!(hello.supported_protocols()[0], ProtocolVersion::TlsV12);
    }

    #[test]
    fn truncated_prefix_is_not_a_client_hello() {
        let bytes = sample_bytes();
        assert!(!is_client_hello(&bytes[..4]));
        assert!(!is_client_hello(&[]));
    }

    #[test]
    fn wrong_type_or_version_is_rejected() {
        let mut bytes = sample_bytes();
        bytes[0] = 0x17;
        assert!(!is_client_hello(&bytes));

        let mut bytes = sample_bytes();
        bytes[2] = 0x09;
        assert!(!is_client_hello(&bytes));

        let mut bytes = sample_bytes();
        bytes[5] = 0x02;
        assert!(!is_client_hello(&bytes));
    }

    #[test]
    fn odd_cipher_block_is_malformed() {
        let mut bytes = build_client_hello(0x0303, &[], &[0x002f, 0x0035]);
        // session id length sits after 5 + 4 + 2 + 32 bytes, suites length follows it
        let suites_len_at = 5 + 4 + 2 + 32 + 1;
        bytes[suites_len_at..suites_len_at + 2].copy_from_slice(&3u16.to_be_bytes());
        let err = parse(&bytes, &CipherSuiteRegistry::new()).unwrap_err();
        assert_eq!(err, ParseError::OddCipherSuiteLength(3));
    }

    #[test]
    fn overlong_session_id_is_reported_not_truncated() {
        let mut bytes = build_client_hello(0x0303, &[1, 2, 3], &[0x002f]);
        let session_len_at = 5 + 4 + 2 + 32;
        bytes[session_len_at] = 0xff;
        assert!(matches!(
            parse(&bytes, &CipherSuiteRegistry::new()),
            Err(ParseError::Truncated { field: "session id", .. })
        ));
    }

    #[test]
    fn cipher_block_past_buffer_end_is_reported() {
        let bytes = build_client_hello(0x0303, &[], &[0x002f, 0x0035, 0x000a]);
        let cut = bytes.len() - 4;
        assert!(matches!(
            parse(&bytes[..cut], &CipherSuiteRegistry::new()),
            Err(ParseError::Truncated { field: "cipher suites", .. })
        ));
    }

    #[test]
    fn session_id_is_skipped() {
        let bytes = build_client_hello(0x0302, &[0xaa; 32], &[0x0035]);
        let hello = parse(&bytes, &CipherSuiteRegistry::new()).unwrap();
        assert_eq!(hello.handshake_version, HexValue::from_u16(0x0302));
        assert_eq!(hello.cipher_suites.len(), 1);
        assert_eq!(hello.cipher_suites[0].hex, HexValue::from_u16(0x0035));
    }

    #[test]
    fn declared_suites_resolve_to_their_policy() {
        let registry = CipherSuiteRegistry::new();
        registry
            .insert(CipherSuite::new(
                HexValue::from_u16(0x002f),
                "TLS_RSA_WITH_AES_128_CBC_SHA",
                Mode::CanBe,
            ))
            .unwrap();
        let bytes = build_client_hello(0x0303, &[], &[0x002f, 0x1301]);
        let hello = parse(&bytes, &registry).unwrap();
        assert_eq!(hello.cipher_suites[0].name, "TLS_RSA_WITH_AES_128_CBC_SHA");
        assert_eq!(hello.cipher_suites[1].mode, Mode::MustNotBe);
        assert!(!hello.fallback_scsv_offered);
    }

    #[test]
    fn record_len_reads_header() {
        let bytes = sample_bytes();
        assert_eq!(record_len(&bytes), Some(5 + 0xc4));
        assert_eq!(record_len(&bytes[..3]), None);
    }

    proptest! {
        #[test]
        fn short_buffers_are_never_client_hellos(bytes in proptest::collection::vec(any::<u8>(), 0..6)) {
            prop_assert!(!is_client_hello(&bytes));
        }

        #[test]
        fn arbitrary_input_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let registry = CipherSuiteRegistry::new();
            let _ = is_client_hello(&bytes);
            let _ = parse(&bytes, &registry);
        }

        #[test]
        fn offered_suites_come_back_in_order(
            suites in proptest::collection::vec(any::<u16>(), 1..40)
        ) {
            let registry = CipherSuiteRegistry::new();
            let bytes = build_client_hello(0x0303, &[], &suites);
            let hello = parse(&bytes, &registry).unwrap();
            let codes: Vec<u16> = hello
                .cipher_suites
                .iter()
                .map(|s| s.hex.to_u64().unwrap() as u16)
                .collect();
            prop_assert_eq!(&codes, &suites);

            let mut distinct = suites.clone();
            distinct.sort_unstable();
            distinct.dedup();
            prop_assert_eq!(registry.len(), distinct.len());
        }

        #[test]
        fn odd_suite_lengths_always_fail(odd in (0u16..200).prop_map(|n| n * 2 + 1)) {
            let mut bytes = build_client_hello(0x0303, &[], &[]);
            let at = 5 + 4 + 2 + 32 + 1;
            bytes.truncate(at);
            bytes.extend_from_slice(&odd.to_be_bytes());
            bytes.extend(std::iter::repeat(0u8).take(usize::from(odd)));
            prop_assert_eq!(
                parse(&bytes, &CipherSuiteRegistry::new()),
                Err(ParseError::OddCipherSuiteLength(usize::from(odd)))
            );
        }
    }
}
