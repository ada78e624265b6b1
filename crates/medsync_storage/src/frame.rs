//! Checksummed frame envelope.
//!
//! Every record the queue or the durable store appends is wrapped as:
//!
//! | field | size |
//! |-------|------|
//! | magic | 4 |
//! | format version (LE) | 2 |
//! | frame type | 1 |
//! | payload length (LE) | 4 |
//! | payload | n |
//! | CRC32 over all preceding bytes (LE) | 4 |
//!
//! Appends are single `append` calls, so a crash leaves at most one
//! incomplete frame, always at the tail. [`scan_frames`] reports that tail
//! as torn rather than corrupt; a bad frame anywhere else is corruption.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use tracing::{debug, warn};

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 11;

/// Size of the trailing checksum.
pub const CRC_SIZE: usize = 4;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Offset of the frame's first byte.
    pub offset: u64,
    /// Format version written in the header.
    pub version: u16,
    /// Caller-defined frame type.
    pub frame_type: u8,
    /// Frame payload.
    pub payload: Vec<u8>,
}

/// Result of scanning a frame log.
#[derive(Debug, Clone, Default)]
pub struct FrameScan {
    /// Complete, checksum-valid frames in log order.
    pub frames: Vec<Frame>,
    /// Length of the valid prefix of the log.
    pub valid_len: u64,
    /// Bytes after the valid prefix belonging to an incomplete frame.
    pub torn_bytes: u64,
}

impl FrameScan {
    /// Returns true if the log ended in an incomplete frame.
    pub fn has_torn_tail(&self) -> bool {
        self.torn_bytes > 0
    }

    /// Truncates the backend to the valid prefix if the tail is torn.
    pub fn repair(&self, backend: &mut dyn StorageBackend) -> StorageResult<()> {
        if self.has_torn_tail() {
            warn!(
                valid_len = self.valid_len,
                torn_bytes = self.torn_bytes,
                "truncating torn frame at log tail"
            );
            backend.truncate(self.valid_len)?;
        }
        Ok(())
    }
}

/// Builds the envelope for one frame.
///
/// # Errors
///
/// Fails if the payload does not fit the 4-byte length field.
pub fn encode_frame(
    magic: [u8; 4],
    version: u16,
    frame_type: u8,
    payload: &[u8],
) -> StorageResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        StorageError::Corrupted(format!("frame payload too large: {} bytes", payload.len()))
    })?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&magic);
    data.extend_from_slice(&version.to_le_bytes());
    data.push(frame_type);
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Appends one frame and makes it durable before returning its offset.
///
/// If any step fails the store is cut back to its size before the call, so
/// a frame the caller saw fail never replays.
pub fn append_frame(
    backend: &mut dyn StorageBackend,
    magic: [u8; 4],
    version: u16,
    frame_type: u8,
    payload: &[u8],
) -> StorageResult<u64> {
    let data = encode_frame(magic, version, frame_type, payload)?;
    let before = backend.size()?;

    let written = backend.append(&data).and_then(|offset| {
        backend.flush()?;
        backend.sync()?;
        Ok(offset)
    });
    if let Err(e) = &written {
        let cut = backend
            .size()
            .and_then(|size| if size > before { backend.truncate(before) } else { Ok(()) });
        if let Err(cut) = cut {
            warn!(offset = before, error = %cut, "could not roll back failed frame append");
        }
        debug!(offset = before, error = %e, "frame append rolled back");
    }
    written
}

/// Reads every frame in the backend.
///
/// # Errors
///
/// Returns [`StorageError::Corrupted`] for a wrong magic or a checksum
/// mismatch on any frame other than the last one.
pub fn scan_frames(backend: &dyn StorageBackend, magic: [u8; 4]) -> StorageResult<FrameScan> {
    let data = backend.read_all()?;
    let total = data.len();
    let mut scan = FrameScan::default();
    let mut pos = 0usize;

    while pos < total {
        let remaining = total - pos;
        if remaining < HEADER_SIZE {
            scan.torn_bytes = remaining as u64;
            break;
        }
        if data[pos..pos + 4] != magic {
            return Err(StorageError::Corrupted(format!("bad frame magic at offset {pos}")));
        }

        let version = u16::from_le_bytes([data[pos + 4], data[pos + 5]]);
        let frame_type = data[pos + 6];
        let len = u32::from_le_bytes([data[pos + 7], data[pos + 8], data[pos + 9], data[pos + 10]])
            as usize;
        let frame_len = HEADER_SIZE + len + CRC_SIZE;
        if remaining < frame_len {
            scan.torn_bytes = remaining as u64;
            break;
        }

        let body_end = pos + HEADER_SIZE + len;
        let stored_crc = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        if compute_crc32(&data[pos..body_end]) != stored_crc {
            if pos + frame_len == total {
                scan.torn_bytes = frame_len as u64;
                break;
            }
            return Err(StorageError::Corrupted(format!(
                "checksum mismatch in frame at offset {pos}"
            )));
        }

        scan.frames.push(Frame {
            offset: pos as u64,
            version,
            frame_type,
            payload: data[pos + HEADER_SIZE..body_end].to_vec(),
        });
        pos += frame_len;
        scan.valid_len = pos as u64;
    }

    Ok(scan)
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;

    const MAGIC: [u8; 4] = *b"TEST";

    fn log_with(frames: &[(u8, &[u8])]) -> InMemoryBackend {
        let mut backend = InMemoryBackend::new();
        for (frame_type, payload) in frames {
            append_frame(&mut backend, MAGIC, 1, *frame_type, payload).unwrap();
        }
        backend
    }

    #[test]
    fn scan_reads_frames_in_order() {
        let backend = log_with(&[(1, b"first"), (2, b""), (3, b"third")]);
        let scan = scan_frames(&backend, MAGIC).unwrap();

        let types: Vec<u8> = scan.frames.iter().map(|f| f.frame_type).collect();
        assert_eq!(types, vec![1, 2, 3]);
        assert_eq!(scan.frames[2].payload, b"third");
        assert_eq!(scan.valid_len, backend.size().unwrap());
        assert!(!scan.has_torn_tail());
    }

    #[test]
    fn partial_tail_is_torn_not_corrupt() {
        let mut backend = log_with(&[(1, b"kept")]);
        let intact = backend.size().unwrap();
        let next = encode_frame(MAGIC, 1, 1, b"lost in crash").unwrap();
        backend.append(&next[..next.len() - 3]).unwrap();

        let scan = scan_frames(&backend, MAGIC).unwrap();
        assert_eq!(scan.frames.len(), 1);
        assert_eq!(scan.valid_len, intact);
        assert!(scan.has_torn_tail());

        scan.repair(&mut backend).unwrap();
        assert_eq!(backend.size().unwrap(), intact);
    }

    #[test]
    fn bad_checksum_on_last_frame_is_torn() {
        let mut backend = log_with(&[(1, b"a")]);
        let mut bytes = encode_frame(MAGIC, 1, 1, b"b").unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        backend.append(&bytes).unwrap();

        let scan = scan_frames(&backend, MAGIC).unwrap();
        assert_eq!(scan.frames.len(), 1);
        assert!(scan.has_torn_tail());
    }

    #[test]
    fn bad_checksum_mid_log_is_corruption() {
        let backend = log_with(&[(1, b"a"), (1, b"b")]);
        let mut bytes = backend.data();
        bytes[HEADER_SIZE] ^= 0xFF;
        let damaged = InMemoryBackend::with_data(bytes);

        assert!(matches!(
            scan_frames(&damaged, MAGIC),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn failed_sync_rolls_the_frame_back() {
        let mut backend = log_with(&[(1, b"kept")]);
        let intact = backend.size().unwrap();

        backend.fail_syncs(1);
        assert!(append_frame(&mut backend, MAGIC, 1, 2, b"unsynced").is_err());
        assert_eq!(backend.size().unwrap(), intact);

        let offset = append_frame(&mut backend, MAGIC, 1, 2, b"retried").unwrap();
        assert_eq!(offset, intact);
        let scan = scan_frames(&backend, MAGIC).unwrap();
        assert_eq!(scan.frames.len(), 2);
        assert_eq!(scan.frames[1].payload, b"retried");
    }

    #[test]
    fn wrong_magic_is_corruption() {
        let backend = log_with(&[(1, b"a")]);
        assert!(matches!(
            scan_frames(&backend, *b"NOPE"),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
