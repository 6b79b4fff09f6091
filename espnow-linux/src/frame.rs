//! Emulated radio frames: one version byte + bincode body per UDP datagram.

use serde::{Deserialize, Serialize};

const FRAME_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// One ESP-NOW datagram. `dst` may be the broadcast address.
    Data {
        seq: u32,
        src: [u8; 6],
        dst: [u8; 6],
        payload: Vec<u8>,
    },
    /// Receiver's confirmation of a unicast `Data` frame.
    Ack { seq: u32, src: [u8; 6], dst: [u8; 6] },
}

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let body = bincode::serialize(frame)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(FRAME_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let (&version, body) = bytes.split_first().ok_or(FrameError::Empty)?;
    if version != FRAME_VERSION {
        return Err(FrameError::Version(version));
    }
    Ok(bincode::deserialize(body)?)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty datagram")]
    Empty,
    #[error("unsupported frame version {0}")]
    Version(u8),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_roundtrip() {
        let f = Frame::Data {
            seq: 7,
            src: [2, 0, 0, 0, 0, 1],
            dst: [0xff; 6],
            payload: b"hello".to_vec(),
        };
        let bytes = encode_frame(&f).unwrap();
        assert_eq!(bytes[0], FRAME_VERSION);
        assert_eq!(decode_frame(&bytes).unwrap(), f);
    }

    #[test]
    fn rejects_foreign_datagrams() {
        assert!(matches!(decode_frame(&[]), Err(FrameError::Empty)));
        assert!(matches!(decode_frame(&[9, 0, 0]), Err(FrameError::Version(9))));
        assert!(matches!(
            decode_frame(&[FRAME_VERSION, 0xff]),
            Err(FrameError::Codec(_))
        ));
    }
}
