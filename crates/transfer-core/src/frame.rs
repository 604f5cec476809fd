//! TCP frame codec (C1): pure encode/decode over a byte buffer + cursor.
//!
//! Layout, all little-endian (spec §3/§4.1):
//! `magic:u16=0xAA55, version:u8, command:u8, format:u8=0x02, sequence:u16,
//! data_length:u32, data[data_length], checksum:u8, trailer:u16=0x55AA`.
//! `data_length` is `u32` (not `u16`) so it can actually reach
//! `MAX_FRAME_BODY` (8 MiB); a `u16` length would cap bodies at 64 KiB and
//! make the oversized-body check unreachable.
//! `checksum` is CRC-8 (poly 0x07, init 0x00) over
//! `version || command || format || sequence || data_length || data`.

use transfer_types::{Command, TcpFrame, FORMAT_PROTOBUF, MAGIC, MAX_FRAME_BODY, TRAILER};

const HEADER_LEN: usize = 2 + 1 + 1 + 1 + 2 + 4; // magic+version+command+format+seq+len
const FOOTER_LEN: usize = 1 + 2; // checksum+trailer

/// Result of attempting to decode one frame from the front of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A full frame was decoded; `consumed` bytes should be dropped from
    /// the front of the caller's buffer.
    Frame { frame: TcpFrame, consumed: usize },
    /// Not enough bytes yet to decode a full frame.
    NeedMoreBytes,
}

/// CRC-8, polynomial 0x07, initial value 0x00 (spec §4.1).
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0x00;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Encode a frame to its on-wire byte representation.
pub fn encode(frame: &TcpFrame) -> Vec<u8> {
    let data_len = frame.data.len() as u32;
    let mut checksum_input = Vec::with_capacity(1 + 1 + 1 + 2 + 4 + frame.data.len());
    checksum_input.push(frame.version);
    checksum_input.push(frame.command.to_byte());
    checksum_input.push(FORMAT_PROTOBUF);
    checksum_input.extend_from_slice(&frame.sequence_number.to_le_bytes());
    checksum_input.extend_from_slice(&data_len.to_le_bytes());
    checksum_input.extend_from_slice(&frame.data);
    let checksum = crc8(&checksum_input);

    let mut out = Vec::with_capacity(HEADER_LEN + frame.data.len() + FOOTER_LEN);
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&checksum_input);
    out.push(checksum);
    out.extend_from_slice(&TRAILER.to_le_bytes());
    out
}

/// Error returned when a present, complete frame fails validation.
/// `NeedMoreBytes` is not an error: it means "try again once more bytes
/// arrive" and is reported via [`DecodeOutcome`] instead.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad magic bytes")]
    BadMagic,
    #[error("bad trailer bytes")]
    BadTrailer,
    #[error("frame body too large: {0} bytes")]
    BodyTooLarge(usize),
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// Attempt to decode one frame from the front of `buf`.
pub fn decode(buf: &[u8]) -> Result<DecodeOutcome, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(DecodeOutcome::NeedMoreBytes);
    }

    let magic = u16::from_le_bytes([buf[0], buf[1]]);
    if magic != MAGIC {
        return Err(FrameError::BadMagic);
    }
    let version = buf[2];
    let command_byte = buf[3];
    // format byte (buf[4]) is not validated further: 0x02 is the only
    // value defined and the client treats the payload as opaque bytes
    // regardless.
    let sequence_number = u16::from_le_bytes([buf[5], buf[6]]);
    let data_length = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;

    if data_length > MAX_FRAME_BODY {
        return Err(FrameError::BodyTooLarge(data_length));
    }

    let total_len = HEADER_LEN + data_length + FOOTER_LEN;
    if buf.len() < total_len {
        return Ok(DecodeOutcome::NeedMoreBytes);
    }

    let data = buf[HEADER_LEN..HEADER_LEN + data_length].to_vec();
    let checksum = buf[HEADER_LEN + data_length];
    let trailer_start = HEADER_LEN + data_length + 1;
    let trailer = u16::from_le_bytes([buf[trailer_start], buf[trailer_start + 1]]);
    if trailer != TRAILER {
        return Err(FrameError::BadTrailer);
    }

    let expected_checksum = crc8(&buf[2..HEADER_LEN + data_length]);
    if checksum != expected_checksum {
        return Err(FrameError::ChecksumMismatch);
    }

    Ok(DecodeOutcome::Frame {
        frame: TcpFrame::new(version, Command::from_byte(command_byte), sequence_number, data),
        consumed: total_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> TcpFrame {
        TcpFrame::new(1, Command::Ping, 42, vec![1, 2, 3, 4, 5])
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let frame = sample_frame();
        let bytes = encode(&frame);
        match decode(&bytes).unwrap() {
            DecodeOutcome::Frame { frame: decoded, consumed } => {
                assert_eq!(decoded, frame);
                assert_eq!(consumed, bytes.len());
            }
            DecodeOutcome::NeedMoreBytes => panic!("expected a full frame"),
        }
    }

    #[test]
    fn empty_body_round_trips() {
        let frame = TcpFrame::new(1, Command::UploadEnd, 1, Vec::new());
        let bytes = encode(&frame);
        match decode(&bytes).unwrap() {
            DecodeOutcome::Frame { frame: decoded, .. } => assert_eq!(decoded, frame),
            DecodeOutcome::NeedMoreBytes => panic!("expected a full frame"),
        }
    }

    #[test]
    fn partial_buffer_reports_need_more_bytes() {
        let frame = sample_frame();
        let bytes = encode(&frame);
        for cut in 0..bytes.len() {
            let outcome = decode(&bytes[..cut]).unwrap();
            assert_eq!(outcome, DecodeOutcome::NeedMoreBytes, "cut at {cut}");
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode(&sample_frame());
        bytes[0] ^= 0xFF;
        assert_eq!(decode(&bytes), Err(FrameError::BadMagic));
    }

    #[test]
    fn bad_trailer_is_rejected() {
        let mut bytes = encode(&sample_frame());
        let len = bytes.len();
        bytes[len - 1] ^= 0xFF;
        assert_eq!(decode(&bytes), Err(FrameError::BadTrailer));
    }

    #[test]
    fn single_bit_flip_in_body_is_caught_by_checksum() {
        let mut bytes = encode(&sample_frame());
        // Flip one bit inside the data region (after the 9-byte header).
        bytes[HEADER_LEN] ^= 0x01;
        assert_eq!(decode(&bytes), Err(FrameError::ChecksumMismatch));
    }

    #[test]
    fn single_bit_flip_in_header_is_caught_by_checksum() {
        let mut bytes = encode(&sample_frame());
        bytes[3] ^= 0x01; // command byte, part of the checksum input
        assert_eq!(decode(&bytes), Err(FrameError::ChecksumMismatch));
    }

    #[test]
    fn oversized_body_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.push(1);
        bytes.push(Command::Ping.to_byte());
        bytes.push(FORMAT_PROTOBUF);
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&((MAX_FRAME_BODY + 1) as u32).to_le_bytes());
        // The declared length alone exceeds MAX_FRAME_BODY; rejected before
        // the frame's actual bytes are available.
        assert_eq!(decode(&bytes), Err(FrameError::BodyTooLarge(MAX_FRAME_BODY + 1)));
    }

    #[test]
    fn crc8_matches_known_vector() {
        // CRC-8/SMBUS of ASCII "123456789" is 0xF4 for poly 0x07 init 0x00.
        assert_eq!(crc8(b"123456789"), 0xF4);
    }
}
