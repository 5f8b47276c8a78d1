//! LZO1X decompressor (safe variant)
//!
//! Every input read and every output write is bounds-checked, so a
//! corrupt stream produces an error rather than a panic.
//!
//! The stream is a sequence of instructions. Each instruction is either a
//! literal run or a back-reference (match), and the low two bits of a
//! match encode a count of 0-3 literals that follow it. The meaning of a
//! small instruction byte (< 16) depends on what came before:
//!
//! | previous            | byte < 16 means                             |
//! |---------------------|---------------------------------------------|
//! | match + 0 literals  | literal run of `t + 3` bytes                |
//! | match + 1-3 literals| 2-byte match, distance up to 1 KiB          |
//! | literal run         | 3-byte match, distance 2 KiB + up to 1 KiB  |
//!
//! The stream ends with a far match of distance zero (`0x11 0x00 0x00`).

#[cfg(any(test, feature = "testing"))]
use alloc::vec::Vec;

use super::CodecError;

/// Distance bias of the 3-byte match that follows a literal run
const M2_MAX_OFFSET: usize = 0x0800;

/// Distance bias of far matches
const M4_BIAS: usize = 0x4000;

struct Stream<'a> {
    input: &'a [u8],
    ip: usize,
    out: &'a mut [u8],
    op: usize,
}

impl<'a> Stream<'a> {
    fn byte(&mut self) -> Result<usize, CodecError> {
        let b = *self.input.get(self.ip).ok_or(CodecError::corrupt(self.op))?;
        self.ip += 1;
        Ok(b as usize)
    }

    fn le16(&mut self) -> Result<usize, CodecError> {
        let lo = self.byte()?;
        let hi = self.byte()?;
        Ok(lo | (hi << 8))
    }

    /// Run length continued over zero bytes: each zero adds 255, the
    /// first non-zero byte ends it
    fn extended(&mut self, base: usize) -> Result<usize, CodecError> {
        let mut len = base;
        loop {
            match self.byte()? {
                0 => len = len.checked_add(255).ok_or(CodecError::corrupt(self.op))?,
                b => return Ok(len + b),
            }
        }
    }

    fn literals(&mut self, n: usize) -> Result<(), CodecError> {
        if n > self.input.len() - self.ip {
            return Err(CodecError::corrupt(self.op));
        }
        if n > self.out.len() - self.op {
            return Err(CodecError::overrun(self.op));
        }
        self.out[self.op..self.op + n].copy_from_slice(&self.input[self.ip..self.ip + n]);
        self.ip += n;
        self.op += n;
        Ok(())
    }

    fn copy_match(&mut self, dist: usize, len: usize) -> Result<(), CodecError> {
        if dist == 0 || dist > self.op {
            return Err(CodecError::corrupt(self.op));
        }
        if len > self.out.len() - self.op {
            return Err(CodecError::overrun(self.op));
        }
        // Source and destination may overlap; copy forward byte by byte
        let start = self.op - dist;
        for i in 0..len {
            self.out[self.op + i] = self.out[start + i];
        }
        self.op += len;
        Ok(())
    }
}

/// Decompress an LZO1X stream into `output`
pub fn decompress(input: &[u8], output: &mut [u8]) -> Result<usize, CodecError> {
    let mut s = Stream { input, ip: 0, out: output, op: 0 };

    // Literals copied right before the current instruction: 0-3 after a
    // match, 4 after a literal run
    let mut state: usize = 0;
    let mut t = s.byte()?;

    if t > 17 {
        t -= 17;
        s.literals(t)?;
        state = if t < 4 { t } else { 4 };
        t = s.byte()?;
    }

    loop {
        let next;
        if t < 16 {
            match state {
                0 => {
                    let n = if t == 0 { s.extended(15)? } else { t };
                    s.literals(n + 3)?;
                    state = 4;
                    t = s.byte()?;
                    continue;
                }
                4 => {
                    let b = s.byte()?;
                    s.copy_match(1 + M2_MAX_OFFSET + (t >> 2) + (b << 2), 3)?;
                }
                _ => {
                    let b = s.byte()?;
                    s.copy_match(1 + (t >> 2) + (b << 2), 2)?;
                }
            }
            next = t & 3;
        } else if t >= 64 {
            let b = s.byte()?;
            s.copy_match(1 + ((t >> 2) & 7) + (b << 3), (t >> 5) + 1)?;
            next = t & 3;
        } else if t >= 32 {
            let len = match t & 31 {
                0 => s.extended(31)?,
                n => n,
            } + 2;
            let v = s.le16()?;
            s.copy_match(1 + (v >> 2), len)?;
            next = v & 3;
        } else {
            let len = match t & 7 {
                0 => s.extended(7)?,
                n => n,
            } + 2;
            let v = s.le16()?;
            let dist = ((t & 8) << 11) + (v >> 2);
            if dist == 0 {
                // End of stream is exactly `0x11 0x00 0x00` with nothing after it
                if len != 3 || s.ip != s.input.len() {
                    return Err(CodecError::corrupt(s.op));
                }
                return Ok(s.op);
            }
            s.copy_match(dist + M4_BIAS, len)?;
            next = v & 3;
        }

        s.literals(next)?;
        state = next;
        t = s.byte()?;
    }
}

/// Encode `data` as a single literal run plus the end marker
///
/// Valid LZO1X that any decompressor accepts. Fallback for test images.
#[cfg(any(test, feature = "testing"))]
pub fn compress_literals(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    let n = data.len();
    if n == 0 {
        // Nothing but the end marker
    } else if n <= 238 {
        out.push((n + 17) as u8);
    } else {
        // Literal run instruction 0 with an extended length of n - 3
        out.push(0);
        let mut rem = n - 18;
        while rem > 255 {
            out.push(0);
            rem -= 255;
        }
        out.push(rem as u8);
    }
    out.extend_from_slice(data);
    out.extend_from_slice(&[0x11, 0x00, 0x00]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_literals_and_overlapping_match() {
        let stream = [20, b'a', b'b', b'c', 232, 0, 0x11, 0, 0];
        let mut out = [0u8; 32];
        let n = decompress(&stream, &mut out).unwrap();
        assert_eq!(&out[..n], b"abcabcabcab");
    }

    #[test]
    fn test_literal_only_streams() {
        for len in [0usize, 1, 3, 4, 18, 19, 238, 239, 273, 274, 529, 4096] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let packed = compress_literals(&data);
            let mut out = vec![0u8; 4096];
            let n = decompress(&packed, &mut out).unwrap_or_else(|e| panic!("len {}: {:?}", len, e));
            assert_eq!(&out[..n], &data[..], "len {}", len);
        }
    }

    #[test]
    fn test_truncated_stream() {
        let stream = [20, b'a', b'b', b'c', 232, 0, 0x11, 0];
        let mut out = [0u8; 32];
        let err = decompress(&stream, &mut out).unwrap_err();
        assert_eq!(err.failure, crate::error::DecompressFailure::Corrupt);
        assert_eq!(err.produced, 11);
    }

    #[test]
    fn test_output_overrun() {
        let stream = [20, b'a', b'b', b'c', 232, 0, 0x11, 0, 0];
        let mut out = [0u8; 8];
        let err = decompress(&stream, &mut out).unwrap_err();
        assert_eq!(err.failure, crate::error::DecompressFailure::OutputOverrun);
    }

    #[test]
    fn test_match_before_start_of_output() {
        // Literal "a" then a 2-byte match reaching 5 bytes back
        let stream = [18, b'a', 0x04, 0x01, 0x11, 0, 0];
        let mut out = [0u8; 16];
        assert!(decompress(&stream, &mut out).is_err());
    }

    #[test]
    fn test_end_marker_length() {
        // Distance zero with a length other than 3
        for marker in [&[0x12u8, 0, 0][..], &[0x10, 0x01, 0, 0][..]] {
            let mut stream = compress_literals(b"kernel");
            stream.truncate(stream.len() - 3);
            stream.extend_from_slice(marker);
            let mut out = [0u8; 16];
            let err = decompress(&stream, &mut out).unwrap_err();
            assert_eq!(err.failure, crate::error::DecompressFailure::Corrupt, "{:x?}", marker);
        }
    }

    /// Literal run of `data` with the end marker left off
    fn literal_prefix(data: &[u8]) -> Vec<u8> {
        let mut stream = compress_literals(data);
        stream.truncate(stream.len() - 3);
        stream
    }

    fn noise(len: usize, seed: u32) -> Vec<u8> {
        let mut x = seed | 1;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                x as u8
            })
            .collect()
    }

    #[test]
    fn test_short_match_after_literal_run() {
        // After a literal run, byte 0x00 is a 3-byte match 2049 bytes back
        let data = noise(2100, 1);
        let mut stream = literal_prefix(&data);
        stream.extend_from_slice(&[0x00, 0x00, 0x11, 0x00, 0x00]);

        let mut out = vec![0u8; 4096];
        let n = decompress(&stream, &mut out).unwrap();
        assert_eq!(n, 2103);
        assert_eq!(&out[..2100], &data[..]);
        assert_eq!(&out[2100..2103], &data[51..54]);
    }

    #[test]
    fn test_medium_match_with_extended_length() {
        // 0x20: length 31 + extension + 2, distance from the next two bytes
        let stream = [20, b'a', b'b', b'c', 0x20, 10, 0x08, 0x00, 0x11, 0x00, 0x00];
        let mut out = [0u8; 64];
        let n = decompress(&stream, &mut out).unwrap();
        assert_eq!(n, 3 + 43);
        assert!(out[..n].iter().enumerate().all(|(i, &b)| b == b"abc"[i % 3]));

        // A zero extension byte adds 255
        let stream = [20, b'x', b'y', b'z', 0x20, 0, 1, 0x08, 0x00, 0x11, 0x00, 0x00];
        let mut out = [0u8; 512];
        let n = decompress(&stream, &mut out).unwrap();
        assert_eq!(n, 3 + 31 + 255 + 1 + 2);
    }

    #[test]
    fn test_far_match() {
        // 0x11 with a non-zero distance reaches 16 KiB + 1 back
        let data = noise(16_400, 7);
        let mut stream = literal_prefix(&data);
        stream.extend_from_slice(&[0x11, 0x04, 0x00, 0x11, 0x00, 0x00]);

        let mut out = vec![0u8; 16_500];
        let n = decompress(&stream, &mut out).unwrap();
        assert_eq!(n, 16_403);
        assert_eq!(&out[16_400..n], &data[15..18]);
    }

    #[test]
    fn test_real_encoder_output() {
        let mut inputs: Vec<Vec<u8>> = Vec::new();
        for (i, len) in [1usize, 17, 300, 1000, 4095, 4096].into_iter().enumerate() {
            inputs.push(noise(len, i as u32 + 11));
            inputs.push((0..len).map(|j| (j * 7 % 251) as u8).collect());
            inputs.push(noise(len, i as u32 + 23).iter().map(|b| b % 4).collect());
        }
        inputs.push(b"console=ttyS0,115200 root=ubi0:rootfs rootfstype=ubifs ".repeat(70));
        inputs.push(vec![0u8; 4096]);
        // Far matches: the same block twice, 20 KiB of noise apart
        let head = noise(600, 99);
        let mut far = head.clone();
        far.extend_from_slice(&noise(20_000, 5));
        far.extend_from_slice(&head);
        inputs.push(far);

        for data in &inputs {
            let packed = lzokay_native::compress(data).unwrap();
            let mut out = vec![0u8; data.len()];
            let n = decompress(&packed, &mut out).unwrap_or_else(|e| panic!("len {}: {:?}", data.len(), e));
            assert_eq!(n, data.len());
            assert_eq!(&out[..], &data[..]);
        }
    }

    #[test]
    fn test_trailing_garbage() {
        let mut stream = compress_literals(b"kernel");
        stream.push(0);
        let mut out = [0u8; 16];
        let err = decompress(&stream, &mut out).unwrap_err();
        assert_eq!(err.failure, crate::error::DecompressFailure::Corrupt);
    }
}
