//! Motorola S-record reader

use super::{hex_bytes, lines, Builder, Format, Image, ImageError};

/// Parse an S-record file
///
/// Returns `Ok(None)` when the text is not an S-record file or carries no
/// data. The checksum byte is dropped without being checked.
pub fn parse_srec(contents: &[u8]) -> Result<Option<Image>, ImageError> {
    let mut builder = Builder::new();

    for (line, text) in lines(contents) {
        if text[0] != b'S' {
            if !builder.has_data() {
                return Ok(None);
            }
            return Err(ImageError::BadFormat { line });
        }
        let kind = text.get(1).copied().unwrap_or(0);
        let addr_len = match kind {
            b'1' => 2,
            b'2' => 3,
            b'3' => 4,
            b'7' | b'8' | b'9' => break,
            // Header and record count
            b'0' | b'5' | b'6' => continue,
            _ => return Err(ImageError::BadRecord { line }),
        };

        let bytes = hex_bytes(&text[2..]).ok_or(ImageError::BadRecord { line })?;
        let count = *bytes.first().ok_or(ImageError::BadRecord { line })? as usize;
        if count < addr_len + 1 || bytes.len() < count + 1 {
            return Err(ImageError::BadRecord { line });
        }

        let addr = bytes[1..=addr_len]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32);
        let payload = &bytes[1 + addr_len..count];
        builder.put(addr, payload)?;
    }

    Ok(builder.finish(Format::Srec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_records() {
        let text = b"S00600004844521B\n\
                     S3090800000001020304E4\n\
                     S3090800000405060708D0\n\
                     S30908000008090A0B0CBC\n\
                     S70508000000F2\n";
        let image = parse_srec(text).unwrap().unwrap();
        assert_eq!(image.base, 0x0800_0000);
        assert_eq!(image.len(), 12);
        assert_eq!(image.data, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_short_addresses() {
        let text = b"S1051000AA55F0\nS2060010040102E2\nS9031000EC\n";
        let image = parse_srec(text).unwrap().unwrap();
        assert_eq!(image.base, 0x1000);
        assert_eq!(image.data, [0xAA, 0x55, 0xFF, 0xFF, 0x01, 0x02]);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let text = b"\r\nS3090800000001020304E4\r\n\r\nS70508000000F2\r\n";
        let image = parse_srec(text).unwrap().unwrap();
        assert_eq!(image.data, [1, 2, 3, 4]);
    }

    #[test]
    fn test_not_srec() {
        assert_eq!(parse_srec(b":00000001FF\n").unwrap(), None);
        assert_eq!(parse_srec(b"\x7fELF\x02\x01").unwrap(), None);
        assert_eq!(parse_srec(b"S0030000FC\nS9030000FC\n").unwrap(), None);
    }

    #[test]
    fn test_garbage_after_data() {
        let text = b"S3090800000001020304E4\nhello\n";
        assert_eq!(
            parse_srec(text),
            Err(ImageError::BadFormat { line: 2 })
        );
    }

    #[test]
    fn test_bad_record() {
        assert_eq!(
            parse_srec(b"S3ZZ\n"),
            Err(ImageError::BadRecord { line: 1 })
        );
        assert_eq!(
            parse_srec(b"S30908000000\n"),
            Err(ImageError::BadRecord { line: 1 })
        );
    }

    #[test]
    fn test_below_base() {
        let text = b"S3090800001001020304D4\nS3090800000001020304E4\n";
        assert_eq!(
            parse_srec(text),
            Err(ImageError::BelowBase {
                addr: 0x0800_0000,
                base: 0x0800_0010
            })
        );
    }
}
