use chardetng::EncodingDetector;
use encoding_rs::Encoding;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding_label: String,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("failed to decode bytes with {encoding}: {message}")]
    DecodeFailure { encoding: String, message: String },
}

/// Decode a fetched text payload (HTML, CSS) into UTF-8 using:
/// BOM -> Content-Type charset -> chardetng fallback.
pub fn decode_text(bytes: &[u8], content_type: Option<&str>) -> Result<DecodedText, DecodeError> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    if let Some(label) = content_type.and_then(extract_charset) {
        if let Some(enc) = Encoding::for_label(label.as_bytes()) {
            return decode_with(bytes, enc);
        }
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let enc = detector.guess(None, true);
    decode_with(bytes, enc)
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|part| {
            let (name, value) = part.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim_matches([' ', '"', '\''].as_ref()).to_string())
        })
        .next()
}

fn decode_with(bytes: &[u8], enc: &'static Encoding) -> Result<DecodedText, DecodeError> {
    let (text, _, had_errors) = enc.decode(bytes);
    if had_errors {
        return Err(DecodeError::DecodeFailure {
            encoding: enc.name().to_string(),
            message: "malformed byte sequence".into(),
        });
    }
    Ok(DecodedText {
        text: text.into_owned(),
        encoding_label: enc.name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_charset_wins_over_detection() {
        let bytes = b"caf\xe9";
        let decoded = decode_text(bytes, Some("text/css; Charset=\"ISO-8859-1\"")).unwrap();
        assert_eq!(decoded.text, "café");
        assert_eq!(decoded.encoding_label, "windows-1252");
    }

    #[test]
    fn bom_is_stripped() {
        let decoded = decode_text(b"\xef\xbb\xbfbody {}", Some("text/css")).unwrap();
        assert_eq!(decoded.text, "body {}");
        assert_eq!(decoded.encoding_label, "UTF-8");
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let err = decode_text(b"ab\xffcd", Some("text/html; charset=utf-8")).unwrap_err();
        assert_eq!(
            err,
            DecodeError::DecodeFailure {
                encoding: "UTF-8".into(),
                message: "malformed byte sequence".into()
            }
        );
    }
}
