use bytes::{Buf, BufMut};

use crate::error::CodecError;

const TYPE_SHORT_STRING: u8 = 4;
const TYPE_LONG_STRING: u8 = 5;

/// Strings shorter than this use the compact form with the length packed into
///  the header byte's cookie.
const SHORT_STRING_LIMIT: usize = 32;

fn combine(type_tag: u8, cookie: u8) -> u8 {
    type_tag | (cookie << 3)
}

pub(crate) fn ensure(buf: &impl Buf, needed: usize, what: &str) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::InvalidFraming(format!(
            "truncated {} ({} bytes left, {} needed)",
            what,
            buf.remaining(),
            needed
        )));
    }
    Ok(())
}

/// Number of bytes `pack_string` emits for a string of the given length.
pub fn packed_len(len: usize) -> usize {
    if len < SHORT_STRING_LIMIT {
        1 + len
    }
    else if len < 0x1_0000 {
        3 + len
    }
    else {
        5 + len
    }
}

/// Append one length-tagged string.
pub fn pack_string(buf: &mut impl BufMut, s: &[u8]) {
    let len = s.len();
    if len < SHORT_STRING_LIMIT {
        buf.put_u8(combine(TYPE_SHORT_STRING, len as u8));
    }
    else if len < 0x1_0000 {
        buf.put_u8(combine(TYPE_LONG_STRING, 2));
        buf.put_u16_le(len as u16);
    }
    else {
        buf.put_u8(combine(TYPE_LONG_STRING, 4));
        buf.put_u32_le(len as u32);
    }
    buf.put_slice(s);
}

/// Decode one length-tagged string from a streaming reader, leaving the
///  reader positioned on whatever follows it.
pub fn unpack_string(buf: &mut impl Buf) -> Result<Vec<u8>, CodecError> {
    ensure(buf, 1, "string header")?;
    let header = buf.get_u8();
    let type_tag = header & 0x7;
    let cookie = header >> 3;

    let len = match type_tag {
        TYPE_SHORT_STRING => cookie as usize,
        TYPE_LONG_STRING => match cookie {
            2 => {
                ensure(buf, 2, "long string length")?;
                buf.get_u16_le() as usize
            }
            4 => {
                ensure(buf, 4, "long string length")?;
                buf.get_u32_le() as usize
            }
            _ => return Err(CodecError::UnsupportedValueType { type_tag, cookie }),
        },
        _ => return Err(CodecError::UnsupportedValueType { type_tag, cookie }),
    };

    ensure(buf, len, "string body")?;
    let mut data = vec![0u8; len];
    buf.copy_to_slice(&mut data);
    Ok(data)
}

/// Decode a contiguous buffer holding back-to-back length-tagged strings,
///  e.g. a reassembled multipart payload. Each string consumes exactly its
///  header plus its declared length; the next string starts on the following
///  byte, and a buffer ending mid-string is an error.
pub fn unpack_strings(data: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut cursor = data;
    let mut strings = Vec::new();
    while !cursor.is_empty() {
        strings.push(unpack_string(&mut cursor)?);
    }
    Ok(strings)
}
