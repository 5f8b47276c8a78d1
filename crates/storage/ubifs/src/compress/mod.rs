//! Compression codec registry
//!
//! Data nodes carry a compression tag. The registry maps tags to
//! decompressors. There is exactly one process-wide registry, built once
//! before the first mount and immutable afterwards; every mount holds a
//! `&'static` reference to it.
//!
//! `NONE` is always present. LZO and raw DEFLATE ("zlib" in UBIFS terms)
//! are compiled in with the `lzo` and `zlib` features. ZSTD is a known tag
//! but has no decompressor here, so such nodes fail with "not compiled in".

#[cfg(feature = "lzo")]
pub mod lzo;

use spin::Once;

use crate::error::{DecompressError, DecompressFailure};

/// Number of compression tags defined by the on-flash format
pub const COMPR_TYPES_CNT: usize = 4;

/// Compression tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 0,
    Lzo = 1,
    Zlib = 2,
    Zstd = 3,
}

impl Compression {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(Compression::None),
            1 => Some(Compression::Lzo),
            2 => Some(Compression::Zlib),
            3 => Some(Compression::Zstd),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lzo => "lzo",
            Compression::Zlib => "zlib",
            Compression::Zstd => "zstd",
        }
    }

    /// Name for a raw tag, "unknown" outside the defined range
    pub fn name_of(tag: u16) -> &'static str {
        Compression::from_u16(tag).map(Compression::name).unwrap_or("unknown")
    }
}

/// Decompress `input` into `output`, returning the number of bytes written
///
/// `output.len()` is the capacity; producing more is an error.
pub type DecompressFn = fn(input: &[u8], output: &mut [u8]) -> Result<usize, CodecError>;

/// Failure reported by a codec function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecError {
    pub failure: DecompressFailure,
    /// Bytes produced before the failure
    pub produced: usize,
}

impl CodecError {
    pub const fn corrupt(produced: usize) -> Self {
        CodecError { failure: DecompressFailure::Corrupt, produced }
    }

    pub const fn overrun(produced: usize) -> Self {
        CodecError { failure: DecompressFailure::OutputOverrun, produced }
    }
}

/// A registered decompressor
#[derive(Clone, Copy)]
pub struct Codec {
    pub name: &'static str,
    pub decompress: DecompressFn,
}

/// Table of decompressors indexed by tag
pub struct CodecRegistry {
    codecs: [Option<Codec>; COMPR_TYPES_CNT],
}

impl CodecRegistry {
    /// Registry with nothing but `NONE`
    pub const fn new() -> Self {
        CodecRegistry {
            codecs: [
                Some(Codec { name: "none", decompress: copy_verbatim }),
                None,
                None,
                None,
            ],
        }
    }

    /// Registry with every codec compiled into this build
    pub fn with_builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = CodecRegistry::new();
        #[cfg(feature = "lzo")]
        registry.register(Compression::Lzo, "lzo", lzo::decompress);
        #[cfg(feature = "zlib")]
        registry.register(Compression::Zlib, "zlib", inflate_raw);
        registry
    }

    /// Install a decompressor for `tag`, replacing any previous one
    pub fn register(&mut self, tag: Compression, name: &'static str, decompress: DecompressFn) {
        self.codecs[tag as usize] = Some(Codec { name, decompress });
    }

    /// Is there a decompressor for this raw tag?
    pub fn supports(&self, tag: u16) -> bool {
        self.codec(tag).is_some()
    }

    fn codec(&self, tag: u16) -> Option<&Codec> {
        self.codecs.get(tag as usize).and_then(|c| c.as_ref())
    }

    /// Decompress `input` into `output` with the codec for `tag`
    pub fn decompress(&self, tag: u16, input: &[u8], output: &mut [u8]) -> Result<usize, DecompressError> {
        let codec = self.codec(tag).ok_or(DecompressError {
            codec: tag,
            input_len: input.len(),
            expected: output.len(),
            actual: 0,
            failure: DecompressFailure::NotCompiledIn,
        })?;
        (codec.decompress)(input, output).map_err(|e| DecompressError {
            codec: tag,
            input_len: input.len(),
            expected: output.len(),
            actual: e.produced,
            failure: e.failure,
        })
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

static REGISTRY: Once<CodecRegistry> = Once::new();

/// The process-wide registry, built with the compiled-in codecs on first use
pub fn registry() -> &'static CodecRegistry {
    REGISTRY.call_once(CodecRegistry::with_builtin)
}

/// Build the process-wide registry with extra codecs
///
/// Must run before the first mount; once the registry exists `setup` is
/// ignored and the existing table is returned.
pub fn init_registry(setup: impl FnOnce(&mut CodecRegistry)) -> &'static CodecRegistry {
    REGISTRY.call_once(|| {
        let mut registry = CodecRegistry::with_builtin();
        setup(&mut registry);
        registry
    })
}

fn copy_verbatim(input: &[u8], output: &mut [u8]) -> Result<usize, CodecError> {
    if input.len() > output.len() {
        output.copy_from_slice(&input[..output.len()]);
        return Err(CodecError::overrun(output.len()));
    }
    output[..input.len()].copy_from_slice(input);
    Ok(input.len())
}

#[cfg(feature = "zlib")]
fn inflate_raw(input: &[u8], output: &mut [u8]) -> Result<usize, CodecError> {
    use miniz_oxide::inflate::{decompress_to_vec_with_limit, TINFLStatus};

    match decompress_to_vec_with_limit(input, output.len()) {
        Ok(out) => {
            output[..out.len()].copy_from_slice(&out);
            Ok(out.len())
        }
        Err(e) if e.status == TINFLStatus::HasMoreOutput => Err(CodecError::overrun(e.output.len())),
        Err(e) => Err(CodecError::corrupt(e.output.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_none_is_builtin() {
        let registry = CodecRegistry::new();
        let mut out = [0u8; 16];
        let n = registry.decompress(0, b"verbatim", &mut out).unwrap();
        assert_eq!(&out[..n], b"verbatim");
    }

    #[test]
    fn test_none_overrun() {
        let registry = CodecRegistry::new();
        let mut out = [0u8; 4];
        let err = registry.decompress(0, b"too long", &mut out).unwrap_err();
        assert_eq!(err.failure, DecompressFailure::OutputOverrun);
        assert_eq!(err.input_len, 8);
        assert_eq!(err.expected, 4);
    }

    #[test]
    fn test_unregistered_tag() {
        let registry = CodecRegistry::new();
        let mut out = [0u8; 4];
        let err = registry.decompress(Compression::Zstd as u16, b"x", &mut out).unwrap_err();
        assert_eq!(err.failure, DecompressFailure::NotCompiledIn);
        assert_eq!(err.codec, 3);
        let err = registry.decompress(99, b"x", &mut out).unwrap_err();
        assert_eq!(err.failure, DecompressFailure::NotCompiledIn);
    }

    #[test]
    fn test_register_custom_codec() {
        fn ones(_input: &[u8], output: &mut [u8]) -> Result<usize, CodecError> {
            output.fill(1);
            Ok(output.len())
        }
        let mut registry = CodecRegistry::new();
        assert!(!registry.supports(3));
        registry.register(Compression::Zstd, "ones", ones);
        assert!(registry.supports(3));
        let mut out = [0u8; 3];
        assert_eq!(registry.decompress(3, b"", &mut out), Ok(3));
        assert_eq!(out, [1, 1, 1]);
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn test_zlib_roundtrip() {
        let original: alloc::vec::Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let packed = miniz_oxide::deflate::compress_to_vec(&original, 6);
        let mut out = vec![0u8; 4096];
        let n = CodecRegistry::with_builtin().decompress(2, &packed, &mut out).unwrap();
        assert_eq!(n, 4096);
        assert_eq!(out, original);
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn test_zlib_overrun_and_garbage() {
        let original = vec![0xAAu8; 2000];
        let packed = miniz_oxide::deflate::compress_to_vec(&original, 6);
        let registry = CodecRegistry::with_builtin();

        let mut small = vec![0u8; 1000];
        let err = registry.decompress(2, &packed, &mut small).unwrap_err();
        assert_eq!(err.failure, DecompressFailure::OutputOverrun);

        let mut out = vec![0u8; 4096];
        let err = registry.decompress(2, &[0xFF, 0xFF, 0xFF, 0xFF], &mut out).unwrap_err();
        assert_eq!(err.failure, DecompressFailure::Corrupt);
    }

    #[test]
    fn test_global_registry_is_shared() {
        let a = registry() as *const CodecRegistry;
        let b = init_registry(|_| {}) as *const CodecRegistry;
        assert_eq!(a, b);
        assert!(registry().supports(0));
    }
}
