//! Wire protocol: one hex-encoded frame per line over TCP.
//!
//! A decoded frame starts with a flag byte: `0x00` carries data (a request
//! statement or a response payload), `0x01` carries a UTF-8 error message.
//! Hex is emitted lowercase and accepted in either case.

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::TcpStream;

use crate::error::{Result, StratumError};

#[derive(Debug, PartialEq)]
pub enum Frame {
    Data(Vec<u8>),
    Err(String),
}

pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    match frame {
        Frame::Data(data) => {
            let mut out = Vec::with_capacity(1 + data.len());
            out.push(0);
            out.extend_from_slice(data);
            out
        }
        Frame::Err(msg) => {
            let mut out = Vec::with_capacity(1 + msg.len());
            out.push(1);
            out.extend_from_slice(msg.as_bytes());
            out
        }
    }
}

pub fn decode_frame(raw: &[u8]) -> Result<Frame> {
    match raw.first() {
        Some(0) => Ok(Frame::Data(raw[1..].to_vec())),
        Some(1) => Ok(Frame::Err(
            String::from_utf8_lossy(&raw[1..]).into_owned(),
        )),
        _ => Err(StratumError::InvalidPkgData),
    }
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

pub fn hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for &b in data {
        out.push(HEX_DIGITS[(b >> 4) as usize] as char);
        out.push(HEX_DIGITS[(b & 0xF) as usize] as char);
    }
    out
}

pub fn hex_decode(line: &str) -> Result<Vec<u8>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.len() % 2 != 0 {
        return Err(StratumError::InvalidPkgData);
    }
    let digits = line.as_bytes();
    let mut out = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks(2) {
        let hi = (pair[0] as char)
            .to_digit(16)
            .ok_or(StratumError::InvalidPkgData)?;
        let lo = (pair[1] as char)
            .to_digit(16)
            .ok_or(StratumError::InvalidPkgData)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Ok(out)
}

/// Frame pipe over one TCP connection.
pub struct Transport {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Transport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);
        Ok(Self { reader, writer })
    }

    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        let line = hex_encode(&encode_frame(frame));
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// The next frame, or `None` on a closed connection.
    pub fn receive(&mut self) -> Result<Option<Frame>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(decode_frame(&hex_decode(&line)?)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_hex_roundtrip() {
        let frame = Frame::Data(b"select * from t".to_vec());
        let line = hex_encode(&encode_frame(&frame));
        assert!(line.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(decode_frame(&hex_decode(&line).unwrap()).unwrap(), frame);
    }

    #[test]
    fn error_frames_carry_utf8_messages() {
        let frame = Frame::Err("table not found".into());
        let raw = encode_frame(&frame);
        assert_eq!(raw[0], 1);
        assert_eq!(decode_frame(&raw).unwrap(), frame);
    }

    #[test]
    fn hex_decode_accepts_upper_case() {
        assert_eq!(hex_decode("00AbCd").unwrap(), vec![0x00, 0xAB, 0xCD]);
    }

    #[test]
    fn bad_hex_and_empty_frames_are_rejected() {
        assert!(hex_decode("abc").is_err());
        assert!(hex_decode("zz").is_err());
        assert!(matches!(
            decode_frame(&[]),
            Err(StratumError::InvalidPkgData)
        ));
        assert!(matches!(
            decode_frame(&[9, 1]),
            Err(StratumError::InvalidPkgData)
        ));
    }
}
