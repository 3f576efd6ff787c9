//! Thin owned wrapper over libopus's multistream decoder API (spec §4.2).
//!
//! `audiopus`'s safe API does not expose `opus_multistream_decoder_*`, so surround/multistream
//! streams go through `audiopus-sys` directly. Ownership follows `bass-aes67`'s FFI idiom in
//! `input/stream.rs`: the handle is owned, non-`Copy`, and `Drop` calls the native destroy
//! function — there is no way to leak it short of `mem::forget`.

use anyhow::{bail, Result};
use audiopus_sys::{
    opus_multistream_decode, opus_multistream_decoder_create, opus_multistream_decoder_destroy,
    OpusMSDecoder,
};
use std::os::raw::c_int;
use std::ptr::NonNull;

/// An owned `OpusMSDecoder*`. Configured for exactly one
/// `(sample_rate, channels, streams, coupled_streams, mapping)` tuple for its whole lifetime;
/// changing the tuple means destroying this and creating a new one (spec invariant 2, §3).
pub struct MultistreamDecoder {
    handle: NonNull<OpusMSDecoder>,
    pub channels: u8,
}

// The underlying libopus decoder has no internal synchronization of its own, but it is only ever
// accessed from behind the per-handler mutex the spec requires (§5); the handle itself carries no
// non-Send/Sync state beyond the raw pointer.
unsafe impl Send for MultistreamDecoder {}

impl MultistreamDecoder {
    pub fn new(sample_rate: u32, channels: u8, streams: u8, coupled_streams: u8, mapping: &[u8]) -> Result<Self> {
        if mapping.len() != channels as usize {
            bail!(
                "opus multistream: mapping length {} does not match channel count {}",
                mapping.len(),
                channels
            );
        }
        let mut error: c_int = 0;
        let handle = unsafe {
            opus_multistream_decoder_create(
                sample_rate as i32,
                channels as c_int,
                streams as c_int,
                coupled_streams as c_int,
                mapping.as_ptr(),
                &mut error,
            )
        };
        if error != 0 || handle.is_null() {
            bail!("opus_multistream_decoder_create failed with error code {error}");
        }
        Ok(Self {
            handle: NonNull::new(handle).expect("checked non-null above"),
            channels,
        })
    }

    /// Decode one packet. `frame_size` is the max number of samples per channel the output
    /// buffer can hold (spec: ⌈sample_rate × 120ms⌉, Opus' maximum frame duration).
    pub fn decode(&mut self, data: &[u8], frame_size: usize) -> Result<Vec<i16>> {
        let mut out = vec![0i16; frame_size * self.channels as usize];
        let decoded = unsafe {
            opus_multistream_decode(
                self.handle.as_ptr(),
                data.as_ptr(),
                data.len() as i32,
                out.as_mut_ptr(),
                frame_size as c_int,
                0,
            )
        };
        if decoded < 0 {
            bail!("opus_multistream_decode failed with error code {decoded}");
        }
        out.truncate(decoded as usize * self.channels as usize);
        Ok(out)
    }
}

impl Drop for MultistreamDecoder {
    fn drop(&mut self) {
        unsafe {
            opus_multistream_decoder_destroy(self.handle.as_ptr());
        }
    }
}
