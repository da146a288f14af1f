// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Block-boundary-exact inflate control, shared by the checkpoint builder
//! (C3) and the random-access reader (C4).
//!
//! Wraps zlib's `inflate()` directly via `libz-sys` instead of `flate2`'s
//! `Decompress`, because this needs three things `flate2` does not expose:
//! stopping exactly at a DEFLATE block boundary (`Z_BLOCK` flush), reading
//! the bit offset within the last consumed byte (`data_type`), and priming
//! a fresh inflater mid-stream with unused bits plus a preset dictionary
//! (`inflatePrime` / `inflateSetDictionary` / `inflateGetDictionary`). This
//! mirrors zlib's own `zran.c` example for building a random-access index
//! over a `.gz` file.

use std::mem::MaybeUninit;
use std::os::raw::{c_int, c_uint};
use std::ptr;

use crate::error::{CrateError, Result};

const WINDOW_SIZE: usize = 32 * 1024;

/// Window-bits argument to `inflateInit2_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// Accept a zlib or gzip header (`15 + 32`): used only when opening at
    /// uncompressed offset 0, where there is no checkpoint to resume from.
    GzipOrZlib,
    /// Raw DEFLATE, no header (`-15`): used when resuming from a
    /// checkpoint's compressed byte offset.
    Raw,
}

impl WindowMode {
    fn bits(self) -> c_int {
        match self {
            WindowMode::GzipOrZlib => 15 + 32,
            WindowMode::Raw => -15,
        }
    }
}

/// Outcome of one `decompress_to_block_boundary` call.
#[derive(Debug, Clone, Copy)]
pub struct BlockOutcome {
    pub bytes_in_consumed: usize,
    pub bytes_out_written: usize,
    /// `true` once `inflate()` has just finished a DEFLATE block (all of
    /// that block's output has been written).
    pub at_block_boundary: bool,
    pub last_block: bool,
    /// Number of unused bits (0-7) in the last byte taken from the input —
    /// this is the checkpoint record's `bits` field.
    pub unused_bits: u8,
    pub stream_end: bool,
}

/// Safe wrapper around a zlib `z_stream` configured for inflation.
pub struct RawInflater {
    strm: Box<libz_sys::z_stream>,
    finished: bool,
}

// `z_stream` owns no thread-local state; the allocator callbacks are left
// null (zlib falls back to its internal malloc/free), so moving the box
// across threads is sound.
unsafe impl Send for RawInflater {}

impl RawInflater {
    pub fn new(mode: WindowMode) -> Result<Self> {
        let mut strm: Box<libz_sys::z_stream> = Box::new(unsafe { MaybeUninit::zeroed().assume_init() });
        let ret = unsafe {
            libz_sys::inflateInit2_(
                strm.as_mut() as *mut libz_sys::z_stream,
                mode.bits(),
                libz_sys::zlibVersion(),
                std::mem::size_of::<libz_sys::z_stream>() as c_int,
            )
        };
        if ret != libz_sys::Z_OK {
            return Err(CrateError::CorruptArchive(format!(
                "inflateInit2_ failed with code {ret}"
            )));
        }
        Ok(Self {
            strm,
            finished: false,
        })
    }

    /// Prime the stream with `bits` unused bits already consumed from the
    /// compressed stream (the high bits of the byte at the checkpoint's
    /// `c_offset`), per `CheckpointRecord::bits`.
    pub fn prime(&mut self, bits: u8, value: i32) -> Result<()> {
        if bits == 0 {
            return Ok(());
        }
        let ret = unsafe {
            libz_sys::inflatePrime(self.strm.as_mut() as *mut libz_sys::z_stream, bits as c_int, value)
        };
        if ret != libz_sys::Z_OK {
            return Err(CrateError::CorruptIndex(format!(
                "inflatePrime failed with code {ret}"
            )));
        }
        Ok(())
    }

    /// Install a preset 32 KiB sliding-window dictionary (or fewer bytes,
    /// at stream start).
    pub fn set_dictionary(&mut self, dict: &[u8]) -> Result<()> {
        let ret = unsafe {
            libz_sys::inflateSetDictionary(
                self.strm.as_mut() as *mut libz_sys::z_stream,
                dict.as_ptr(),
                dict.len() as c_uint,
            )
        };
        if ret != libz_sys::Z_OK {
            return Err(CrateError::CorruptIndex(format!(
                "inflateSetDictionary failed with code {ret}"
            )));
        }
        Ok(())
    }

    /// Copy out the inflater's current sliding window (up to 32 KiB). Used
    /// by the checkpoint builder right before storing a checkpoint.
    pub fn get_dictionary(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; WINDOW_SIZE];
        let mut len: c_uint = 0;
        let ret = unsafe {
            libz_sys::inflateGetDictionary(
                self.strm.as_mut() as *mut libz_sys::z_stream,
                buf.as_mut_ptr(),
                &mut len as *mut c_uint,
            )
        };
        if ret != libz_sys::Z_OK {
            return Err(CrateError::CorruptArchive(format!(
                "inflateGetDictionary failed with code {ret}"
            )));
        }
        buf.truncate(len as usize);
        Ok(buf)
    }

    /// Feed `input` and decompress into `output` with `Z_BLOCK` flush, i.e.
    /// stop as soon as a DEFLATE block boundary is reached (or output/input
    /// is exhausted first). Call repeatedly, advancing past consumed input,
    /// until `at_block_boundary` or `stream_end`.
    pub fn decompress_to_block_boundary(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<BlockOutcome> {
        if self.finished {
            return Ok(BlockOutcome {
                bytes_in_consumed: 0,
                bytes_out_written: 0,
                at_block_boundary: true,
                last_block: true,
                unused_bits: 0,
                stream_end: true,
            });
        }

        self.strm.next_in = input.as_ptr() as *mut u8;
        self.strm.avail_in = input.len() as c_uint;
        self.strm.next_out = output.as_mut_ptr();
        self.strm.avail_out = output.len() as c_uint;

        let ret = unsafe {
            libz_sys::inflate(self.strm.as_mut() as *mut libz_sys::z_stream, libz_sys::Z_BLOCK)
        };

        let bytes_in_consumed = input.len() - self.strm.avail_in as usize;
        let bytes_out_written = output.len() - self.strm.avail_out as usize;

        match ret {
            libz_sys::Z_OK | libz_sys::Z_BUF_ERROR => {
                let data_type = self.strm.data_type;
                let unused_bits = (data_type & 0x07) as u8;
                let at_block_boundary = data_type & 0x80 != 0;
                let last_block = data_type & 0x40 != 0;
                Ok(BlockOutcome {
                    bytes_in_consumed,
                    bytes_out_written,
                    at_block_boundary,
                    last_block,
                    unused_bits,
                    stream_end: false,
                })
            }
            libz_sys::Z_STREAM_END => {
                self.finished = true;
                Ok(BlockOutcome {
                    bytes_in_consumed,
                    bytes_out_written,
                    at_block_boundary: true,
                    last_block: true,
                    unused_bits: 0,
                    stream_end: true,
                })
            }
            code => Err(CrateError::CorruptArchive(format!(
                "inflate failed with code {code}"
            ))),
        }
    }

    /// Bulk-decompress with `Z_NO_FLUSH`, ignoring block boundaries —
    /// used by the reader once it is streaming bytes to the caller instead
    /// of scanning for checkpoints.
    pub fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<BlockOutcome> {
        if self.finished {
            return Ok(BlockOutcome {
                bytes_in_consumed: 0,
                bytes_out_written: 0,
                at_block_boundary: true,
                last_block: true,
                unused_bits: 0,
                stream_end: true,
            });
        }

        self.strm.next_in = input.as_ptr() as *mut u8;
        self.strm.avail_in = input.len() as c_uint;
        self.strm.next_out = output.as_mut_ptr();
        self.strm.avail_out = output.len() as c_uint;

        let ret = unsafe {
            libz_sys::inflate(self.strm.as_mut() as *mut libz_sys::z_stream, libz_sys::Z_NO_FLUSH)
        };

        let bytes_in_consumed = input.len() - self.strm.avail_in as usize;
        let bytes_out_written = output.len() - self.strm.avail_out as usize;

        match ret {
            libz_sys::Z_OK | libz_sys::Z_BUF_ERROR => Ok(BlockOutcome {
                bytes_in_consumed,
                bytes_out_written,
                at_block_boundary: false,
                last_block: false,
                unused_bits: 0,
                stream_end: false,
            }),
            libz_sys::Z_STREAM_END => {
                self.finished = true;
                Ok(BlockOutcome {
                    bytes_in_consumed,
                    bytes_out_written,
                    at_block_boundary: true,
                    last_block: true,
                    unused_bits: 0,
                    stream_end: true,
                })
            }
            code => Err(CrateError::CorruptArchive(format!(
                "inflate failed with code {code}"
            ))),
        }
    }

    pub fn stream_end(&self) -> bool {
        self.finished
    }

    /// Cumulative compressed bytes consumed across all calls so far.
    pub fn total_in(&self) -> u64 {
        self.strm.total_in as u64
    }

    /// Cumulative uncompressed bytes produced across all calls so far.
    pub fn total_out(&self) -> u64 {
        self.strm.total_out as u64
    }
}

impl Drop for RawInflater {
    fn drop(&mut self) {
        unsafe {
            libz_sys::inflateEnd(self.strm.as_mut() as *mut libz_sys::z_stream);
        }
    }
}

impl std::fmt::Debug for RawInflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawInflater")
            .field("finished", &self.finished)
            .finish()
    }
}

/// Gzip-compress a sliding-window dictionary for storage (§4.3 step 6),
/// using `flate2`'s ordinary whole-buffer gzip framing.
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`gzip_compress`], used to restore a checkpoint's dictionary.
pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CrateError::CorruptIndex(format!("dictionary decompression failed: {e}")))?;
    Ok(out)
}
