use bech32::{FromBase32, ToBase32, Variant};
use thiserror::Error;

const NPUB_HRP: &str = "npub";

#[derive(Error, Debug, PartialEq)]
pub enum Nip19Error {
    #[error("invalid bech32 string: {0}")]
    Bech32(String),

    #[error("unexpected prefix '{0}', expected 'npub'")]
    WrongPrefix(String),

    #[error("decoded payload is {0} bytes, expected 32")]
    BadLength(usize),

    #[error("not a hex pubkey or npub")]
    Unrecognized,
}

/// Encode a 32-byte hex pubkey as `npub1...`.
pub fn encode_npub(pubkey_hex: &str) -> Result<String, Nip19Error> {
    let bytes = decode_hex32(pubkey_hex)?;
    bech32::encode(NPUB_HRP, bytes.to_base32(), Variant::Bech32)
        .map_err(|e| Nip19Error::Bech32(e.to_string()))
}

/// Decode an `npub1...` string to its lowercase hex pubkey.
pub fn decode_npub(npub: &str) -> Result<String, Nip19Error> {
    let (hrp, data, _variant) =
        bech32::decode(npub).map_err(|e| Nip19Error::Bech32(e.to_string()))?;
    if hrp != NPUB_HRP {
        return Err(Nip19Error::WrongPrefix(hrp));
    }
    let bytes = Vec::<u8>::from_base32(&data).map_err(|e| Nip19Error::Bech32(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(Nip19Error::BadLength(bytes.len()));
    }
    Ok(hex::encode(bytes))
}

/// Accept either form used by public endpoints and return lowercase hex,
/// which is what every internal table and filter stores.
pub fn normalize_pubkey(input: &str) -> Result<String, Nip19Error> {
    let trimmed = input.trim();
    if trimmed.starts_with(NPUB_HRP) {
        return decode_npub(trimmed);
    }
    if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(trimmed.to_ascii_lowercase());
    }
    Err(Nip19Error::Unrecognized)
}

fn decode_hex32(pubkey_hex: &str) -> Result<[u8; 32], Nip19Error> {
    let bytes = hex::decode(pubkey_hex).map_err(|_| Nip19Error::Unrecognized)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Nip19Error::BadLength(bytes.len()))
}
