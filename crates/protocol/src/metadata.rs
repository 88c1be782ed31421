//! `Upload-Metadata` and `Upload-Offset` header encoding.
//!
//! Metadata is a comma-separated list of `key base64(value)` pairs. Keys
//! must be non-empty ASCII and contain neither spaces nor commas.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::constants::headers;
use crate::error::ProtocolError;

/// Checks that `key` can appear in an `Upload-Metadata` header.
pub fn validate_metadata_key(key: &str) -> Result<(), ProtocolError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii() && !c.is_ascii_control() && c != ' ' && c != ',');
    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidMetadataKey(key.to_string()))
    }
}

/// Encodes key/value pairs into an `Upload-Metadata` header value.
///
/// Empty values are sent as a bare key, which tus permits.
pub fn encode_metadata(pairs: &[(String, String)]) -> Result<String, ProtocolError> {
    let mut parts = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        validate_metadata_key(key)?;
        if value.is_empty() {
            parts.push(key.clone());
        } else {
            parts.push(format!("{key} {}", STANDARD.encode(value.as_bytes())));
        }
    }
    Ok(parts.join(","))
}

/// Parses an `Upload-Offset` header value.
pub fn parse_offset(value: &str) -> Result<u64, ProtocolError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidHeader {
            header: headers::UPLOAD_OFFSET,
            value: value.to_string(),
        });
    }
    trimmed.parse().map_err(|_| ProtocolError::InvalidHeader {
        header: headers::UPLOAD_OFFSET,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn decode_metadata(header: &str) -> Result<Vec<(String, String)>, ProtocolError> {
        let mut pairs = Vec::new();
        for part in header.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut fields = part.splitn(2, ' ');
            let key = fields.next().unwrap_or_default();
            validate_metadata_key(key)?;
            let value = match fields.next() {
                Some(encoded) => {
                    let bytes = STANDARD.decode(encoded.trim()).map_err(|_| {
                        ProtocolError::InvalidHeader {
                            header: headers::UPLOAD_METADATA,
                            value: part.to_string(),
                        }
                    })?;
                    String::from_utf8_lossy(&bytes).into_owned()
                }
                None => String::new(),
            };
            pairs.push((key.to_string(), value));
        }
        Ok(pairs)
    }

    #[test]
    fn encodes_values_as_base64() {
        let header = encode_metadata(&pairs(&[("name", "clip.mp4"), ("filetype", "video/mp4")]))
            .unwrap();
        assert_eq!(header, "name Y2xpcC5tcDQ=,filetype dmlkZW8vbXA0");
    }

    #[test]
    fn empty_value_is_bare_key() {
        let header = encode_metadata(&pairs(&[("requiresignedurls", "")])).unwrap();
        assert_eq!(header, "requiresignedurls");
    }

    #[test]
    fn rejects_key_with_space_or_comma() {
        assert!(matches!(
            encode_metadata(&pairs(&[("bad key", "v")])),
            Err(ProtocolError::InvalidMetadataKey(_))
        ));
        assert!(encode_metadata(&pairs(&[("a,b", "v")])).is_err());
        assert!(encode_metadata(&pairs(&[("", "v")])).is_err());
    }

    #[test]
    fn decode_reverses_encode_with_unicode() {
        let original = pairs(&[("name", "vidéo final.mov"), ("flag", "")]);
        let header = encode_metadata(&original).unwrap();
        assert_eq!(decode_metadata(&header).unwrap(), original);
    }

    #[test]
    fn parse_offset_accepts_digits() {
        assert_eq!(parse_offset("0").unwrap(), 0);
        assert_eq!(parse_offset(" 10485760 ").unwrap(), 10 * 1024 * 1024);
    }

    #[test]
    fn parse_offset_rejects_garbage() {
        assert!(parse_offset("").is_err());
        assert!(parse_offset("-5").is_err());
        assert!(parse_offset("12abc").is_err());
        assert!(parse_offset("99999999999999999999999").is_err());
    }
}
