// Length-delimited message framing for the reliable (TCP) transport.
//
// TCP delivers a byte stream, so each encoded `Message` is prefixed with a
// 2-byte big-endian length. Several messages may arrive in one read and one
// message may be split across reads; `read_frame` uses `read_exact` on both
// the prefix and the payload, so either case is absorbed here.
//
// Datagrams on the unreliable transport are already one message each and are
// never framed.

use std::io::{self, Read, Write};

use crate::error::CodecError;
use crate::message::Message;

/// Largest payload a 2-byte length prefix can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Write a length-delimited frame: 2-byte big-endian length, then payload.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
                payload.len()
            ),
        )
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read a length-delimited frame: 2-byte big-endian length, then payload.
///
/// Returns `UnexpectedEof` if the stream closes cleanly before or during a
/// frame.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf)?;
    let len = usize::from(u16::from_be_bytes(len_buf));
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Encode a message and write it as one frame.
pub fn write_message<W: Write>(writer: &mut W, msg: &Message) -> io::Result<()> {
    let bytes = msg.encode().map_err(codec_to_io)?;
    write_frame(writer, &bytes)
}

/// Read one frame and decode it. Undecodable frames come back as
/// `Message::Unknown`; only transport failures are errors.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Message> {
    let bytes = read_frame(reader)?;
    Ok(Message::decode(&bytes))
}

fn codec_to_io(err: CodecError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A reader that hands out at most one byte per `read` call.
    struct Trickle<'a> {
        data: &'a [u8],
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.data[0];
            self.data = &self.data[1..];
            Ok(1)
        }
    }

    #[test]
    fn roundtrip_simple_frame() {
        let original = b"hello, relay!";
        let mut buf = Vec::new();
        write_frame(&mut buf, original).unwrap();
        assert_eq!(&buf[..2], &[0, 13]);

        let mut cursor = Cursor::new(&buf);
        let recovered = read_frame(&mut cursor).unwrap();
        assert_eq!(recovered, original);
    }

    #[test]
    fn roundtrip_empty_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"").unwrap();

        let mut cursor = Cursor::new(&buf);
        let recovered = read_frame(&mut cursor).unwrap();
        assert!(recovered.is_empty());
    }

    #[test]
    fn max_size_frame_fits() {
        let big = vec![7u8; MAX_FRAME_SIZE];
        let mut buf = Vec::new();
        write_frame(&mut buf, &big).unwrap();
        assert_eq!(&buf[..2], &[0xFF, 0xFF]);
        let recovered = read_frame(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(recovered.len(), MAX_FRAME_SIZE);
    }

    #[test]
    fn rejects_oversized_write() {
        let big = vec![0u8; MAX_FRAME_SIZE + 1];
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    #[test]
    fn read_unexpected_eof() {
        // Only 1 byte when 2 are needed for the length prefix.
        let mut cursor = Cursor::new(vec![0u8]);
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn eof_inside_payload() {
        let mut cursor = Cursor::new(vec![0u8, 5, 1, 2]);
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn coalesced_frames_in_one_buffer() {
        let frames: Vec<&[u8]> = vec![b"first", b"second", b"third"];
        let mut buf = Vec::new();
        for frame in &frames {
            write_frame(&mut buf, frame).unwrap();
        }

        let mut cursor = Cursor::new(&buf);
        for expected in &frames {
            let recovered = read_frame(&mut cursor).unwrap();
            assert_eq!(recovered, *expected);
        }
    }

    #[test]
    fn frames_split_across_reads() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"split").unwrap();
        write_frame(&mut buf, b"apart").unwrap();

        let mut trickle = Trickle { data: &buf };
        assert_eq!(read_frame(&mut trickle).unwrap(), b"split");
        assert_eq!(read_frame(&mut trickle).unwrap(), b"apart");
    }

    #[test]
    fn unknown_frame_does_not_poison_stream() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[0xEE, 1, 2]).unwrap();
        write_message(&mut buf, &Message::StrategyAck).unwrap();

        let mut cursor = Cursor::new(&buf);
        assert_eq!(
            read_message(&mut cursor).unwrap(),
            Message::Unknown { opcode: 0xEE }
        );
        assert_eq!(read_message(&mut cursor).unwrap(), Message::StrategyAck);
    }
}
