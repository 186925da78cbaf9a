//! Intel HEX reader

use super::{hex_bytes, lines, Builder, Format, Image, ImageError};

const DATA: u8 = 0x00;
const END_OF_FILE: u8 = 0x01;
const EXTENDED_LINEAR_ADDRESS: u8 = 0x04;
const START_LINEAR_ADDRESS: u8 = 0x05;

/// Parse an Intel HEX file
///
/// Returns `Ok(None)` when the text is not an Intel HEX file or carries no
/// data. Data records must hold whole words at word-aligned addresses.
pub fn parse_ihex(contents: &[u8]) -> Result<Option<Image>, ImageError> {
    let mut builder = Builder::new();
    let mut high = 0u32;

    for (line, text) in lines(contents) {
        if text[0] != b':' {
            if !builder.has_data() {
                return Ok(None);
            }
            return Err(ImageError::BadFormat { line });
        }

        let bytes = hex_bytes(&text[1..]).ok_or(ImageError::BadRecord { line })?;
        if bytes.len() < 5 {
            return Err(ImageError::BadRecord { line });
        }
        let count = bytes[0] as usize;
        let kind = bytes[3];
        match kind {
            END_OF_FILE => break,
            START_LINEAR_ADDRESS => continue,
            _ => {}
        }

        if count & 1 != 0 {
            return Err(ImageError::OddLength { line });
        }
        if bytes.len() < count + 5 {
            return Err(ImageError::BadRecord { line });
        }
        let record = &bytes[..count + 5];
        let sum = record.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0 {
            return Err(ImageError::BadChecksum { line });
        }

        let addr = high << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32;
        let payload = &record[4..4 + count];
        match kind {
            DATA => {
                if addr & 3 != 0 {
                    return Err(ImageError::OddAddress { line, addr });
                }
                builder.put(addr, payload)?;
            }
            EXTENDED_LINEAR_ADDRESS => {
                if count != 2 {
                    return Err(ImageError::BadRecord { line });
                }
                high = (payload[0] as u32) << 8 | payload[1] as u32;
            }
            kind => return Err(ImageError::UnknownRecordType { line, kind }),
        }
    }

    Ok(builder.finish(Format::Ihex))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_address() {
        let text = b":020000040800F2\n\
                     :0400000001020304F2\n\
                     :0400080005060708DA\n\
                     :04000005080000ED02\n\
                     :00000001FF\n";
        let image = parse_ihex(text).unwrap().unwrap();
        assert_eq!(image.base, 0x0800_0000);
        assert_eq!(image.data, [1, 2, 3, 4, 0xFF, 0xFF, 0xFF, 0xFF, 5, 6, 7, 8]);
    }

    #[test]
    fn test_bad_checksum() {
        assert_eq!(
            parse_ihex(b":0400000001020304F3\n"),
            Err(ImageError::BadChecksum { line: 1 })
        );
    }

    #[test]
    fn test_odd_length() {
        assert_eq!(
            parse_ihex(b":03000000010203F7\n"),
            Err(ImageError::OddLength { line: 1 })
        );
    }

    #[test]
    fn test_odd_address() {
        assert_eq!(
            parse_ihex(b":0400020001020304F0\n"),
            Err(ImageError::OddAddress { line: 1, addr: 2 })
        );
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            parse_ihex(b":020000021234B6\n"),
            Err(ImageError::UnknownRecordType { line: 1, kind: 2 })
        );
    }

    #[test]
    fn test_not_ihex() {
        assert_eq!(parse_ihex(b"S9030000FC\n").unwrap(), None);
        assert_eq!(parse_ihex(b":00000001FF\n").unwrap(), None);
    }
}
