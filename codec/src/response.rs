use bytes::{Buf, BufMut};

use crate::error::{CodecError, DecodeFailure};
use crate::reassembly::ReassemblyTable;
use crate::request::{chunk_session, put_chunks, TAG_MULTI_BODY, TAG_MULTI_TAIL};
use crate::strings::{ensure, pack_string, packed_len, unpack_string, unpack_strings};

const TAG_SINGLE_OK: u8 = 0x00;
const TAG_MULTI_HEAD_OK: u8 = 0x01;
const TAG_SINGLE_FAIL: u8 = 0x80;
const TAG_MULTI_HEAD_FAIL: u8 = 0x81;

/// The answer to a call. The session must match a pending request on the
///  sender side; session 0 never appears on the wire because pushes are not
///  answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    pub session: u32,
    pub ok: bool,
    pub message: Vec<u8>,
}

/// Per-connection reassembly state for inbound responses. The head metadata
///  is the ok flag, which the tail needs back when the response completes.
pub type ResponseReassembly = ReassemblyTable<bool>;

/// Encode a response as one or more length-prefixed frames. Same shape
///  policy as requests: the packed message either fits one frame below
///  `part_size` or travels as head + chunks.
pub fn encode_response(
    buf: &mut impl BufMut,
    resp: &ResponsePacket,
    part_size: usize,
) -> Result<(), CodecError> {
    assert!(part_size > 0);

    let mut payload = Vec::with_capacity(packed_len(resp.message.len()));
    pack_string(&mut payload, &resp.message);
    let sz = payload.len();
    if sz > u32::MAX as usize {
        return Err(CodecError::InvalidFraming(format!(
            "packed message of {} bytes exceeds the u32 total-size field",
            sz
        )));
    }

    if sz < part_size {
        if sz + 5 > u16::MAX as usize {
            return Err(CodecError::InvalidFraming(format!(
                "packet body of {} bytes does not fit the length prefix",
                sz + 5
            )));
        }
        buf.put_u16((sz + 5) as u16);
        buf.put_u8(if resp.ok { TAG_SINGLE_OK } else { TAG_SINGLE_FAIL });
        buf.put_u32_le(resp.session);
        buf.put_slice(&payload);
        return Ok(());
    }

    buf.put_u16(9);
    buf.put_u8(if resp.ok { TAG_MULTI_HEAD_OK } else { TAG_MULTI_HEAD_FAIL });
    buf.put_u32_le(resp.session);
    buf.put_u32_le(sz as u32);

    put_chunks(buf, resp.session, &payload, part_size);
    Ok(())
}

/// Decode one response packet body. `Ok(None)` means the packet advanced
///  multipart state without completing a response.
pub fn decode_response(
    packet: &[u8],
    reassembly: &mut ResponseReassembly,
) -> Result<Option<ResponsePacket>, DecodeFailure> {
    let buf = &mut &packet[..];
    if buf.is_empty() {
        return Err(CodecError::InvalidFraming("empty response packet".to_string()).into());
    }

    match buf.get_u8() {
        tag @ (TAG_SINGLE_OK | TAG_SINGLE_FAIL) => decode_single(buf, tag == TAG_SINGLE_OK),
        tag @ (TAG_MULTI_HEAD_OK | TAG_MULTI_HEAD_FAIL) => {
            decode_head(buf, tag == TAG_MULTI_HEAD_OK, reassembly)
        }
        TAG_MULTI_BODY => {
            let session = chunk_session(buf)?;
            reassembly.append(session, *buf).map_err(DecodeFailure::bare)?;
            Ok(None)
        }
        TAG_MULTI_TAIL => decode_tail(buf, reassembly),
        other => {
            Err(CodecError::InvalidFraming(format!("unknown response tag 0x{:02x}", other)).into())
        }
    }
}

fn decode_single(buf: &mut &[u8], ok: bool) -> Result<Option<ResponsePacket>, DecodeFailure> {
    ensure(buf, 4, "response header").map_err(DecodeFailure::bare)?;
    let session = buf.get_u32_le();

    let message = unpack_string(buf).map_err(|e| DecodeFailure::for_session(session, e))?;
    Ok(Some(ResponsePacket { session, ok, message }))
}

fn decode_head(
    buf: &mut &[u8],
    ok: bool,
    reassembly: &mut ResponseReassembly,
) -> Result<Option<ResponsePacket>, DecodeFailure> {
    if buf.remaining() != 8 {
        return Err(CodecError::InvalidFraming(format!(
            "multipart response head must have an 8-byte body, got {}",
            buf.remaining()
        ))
        .into());
    }
    let session = buf.get_u32_le();
    let declared = buf.get_u32_le() as usize;

    reassembly.begin(session, ok, declared);
    Ok(None)
}

fn decode_tail(
    buf: &mut &[u8],
    reassembly: &mut ResponseReassembly,
) -> Result<Option<ResponsePacket>, DecodeFailure> {
    let session = chunk_session(buf)?;
    let (ok, payload) = reassembly.finish(session, *buf).map_err(DecodeFailure::bare)?;

    let message =
        parse_multipart_payload(&payload).map_err(|e| DecodeFailure::for_session(session, e))?;
    Ok(Some(ResponsePacket { session, ok, message }))
}

/// A reassembled multipart response carries exactly one length-tagged string.
fn parse_multipart_payload(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let strings = unpack_strings(payload)?;
    let [message]: [Vec<u8>; 1] = strings.try_into().map_err(|s: Vec<Vec<u8>>| {
        CodecError::InvalidFraming(format!(
            "multipart response payload must hold one message string, got {}",
            s.len()
        ))
    })?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::DEFAULT_PART_SIZE;
    use rstest::rstest;

    fn split_frames(mut stream: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while !stream.is_empty() {
            let len = u16::from_be_bytes([stream[0], stream[1]]) as usize;
            frames.push(stream[2..2 + len].to_vec());
            stream = &stream[2 + len..];
        }
        frames
    }

    #[test]
    fn test_single_ok_exact_bytes() {
        let original = ResponsePacket { session: 42, ok: true, message: b"hi".to_vec() };
        let mut buf = Vec::new();
        encode_response(&mut buf, &original, DEFAULT_PART_SIZE).unwrap();

        assert_eq!(
            buf,
            vec![
                0x00, 0x08, // length 8
                0x00, // single frame, ok
                0x2a, 0x00, 0x00, 0x00, // session 42, little-endian
                0x14, b'h', b'i', // message
            ]
        );

        let mut reassembly = ResponseReassembly::default();
        assert_eq!(decode_response(&buf[2..], &mut reassembly).unwrap(), Some(original));
    }

    #[test]
    fn test_single_failure_sets_high_bit() {
        let original =
            ResponsePacket { session: 3, ok: false, message: b"no such service".to_vec() };
        let mut buf = Vec::new();
        encode_response(&mut buf, &original, DEFAULT_PART_SIZE).unwrap();

        assert_eq!(buf[2], 0x80);

        let mut reassembly = ResponseReassembly::default();
        let decoded = decode_response(&buf[2..], &mut reassembly).unwrap().unwrap();
        assert!(!decoded.ok);
        assert_eq!(decoded, original);
    }

    #[rstest]
    #[case::ok(true, TAG_MULTI_HEAD_OK)]
    #[case::failed(false, TAG_MULTI_HEAD_FAIL)]
    fn test_multipart_round_trip(#[case] ok: bool, #[case] expected_head_tag: u8) {
        let original = ResponsePacket { session: 9, ok, message: vec![0x77; 50] };
        let mut buf = Vec::new();
        encode_response(&mut buf, &original, 16).unwrap();

        let frames = split_frames(&buf);
        assert_eq!(frames[0], {
            // head: tag, session LE, totalsize LE (50 byte message packs to 53)
            vec![expected_head_tag, 0x09, 0, 0, 0, 53, 0, 0, 0]
        });

        let mut reassembly = ResponseReassembly::default();
        let mut complete = None;
        for (i, frame) in frames.iter().enumerate() {
            let decoded = decode_response(frame, &mut reassembly).unwrap();
            if i + 1 < frames.len() {
                assert_eq!(decoded, None);
            }
            else {
                complete = decoded;
            }
        }
        assert_eq!(complete, Some(original));
        assert!(reassembly.is_empty());
    }

    #[test]
    fn test_tail_with_unknown_session() {
        let packet = [0x03, 99, 0, 0, 0, b'x'];
        let mut reassembly = ResponseReassembly::default();

        let failure = decode_response(&packet, &mut reassembly).unwrap_err();
        assert_eq!(failure.error, CodecError::UnknownSession(99));
        assert!(reassembly.is_empty());
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::unknown_tag(vec![0x42, 1, 2, 3])]
    #[case::truncated_single(vec![0x00, 1, 0])]
    #[case::head_wrong_size(vec![0x01, 1, 0, 0, 0, 2, 0, 0])]
    fn test_framing_errors(#[case] packet: Vec<u8>) {
        let mut reassembly = ResponseReassembly::default();
        let failure = decode_response(&packet, &mut reassembly).unwrap_err();
        assert!(matches!(failure.error, CodecError::InvalidFraming(_)));
    }

    #[test]
    fn test_empty_message_round_trip() {
        let original = ResponsePacket { session: 1, ok: true, message: Vec::new() };
        let mut buf = Vec::new();
        encode_response(&mut buf, &original, DEFAULT_PART_SIZE).unwrap();

        let mut reassembly = ResponseReassembly::default();
        assert_eq!(decode_response(&buf[2..], &mut reassembly).unwrap(), Some(original));
    }
}
