//! Safe wrapper around the SpeexDSP resampler.

use std::ffi::c_int;

/// Opaque type for SpeexResamplerState
#[repr(C)]
pub struct SpeexResamplerState {
    _private: [u8; 0],
}

const SPEEX_RESAMPLER_QUALITY_DEFAULT: c_int = 4;
const RESAMPLER_ERR_SUCCESS: c_int = 0;

unsafe extern "C" {
    fn speex_resampler_init(
        nb_channels: u32,
        in_rate: u32,
        out_rate: u32,
        quality: c_int,
        err: *mut c_int,
    ) -> *mut SpeexResamplerState;
    fn speex_resampler_destroy(st: *mut SpeexResamplerState);
    fn speex_resampler_process_int(
        st: *mut SpeexResamplerState,
        channel_index: u32,
        in_: *const i16,
        in_len: *mut u32,
        out: *mut i16,
        out_len: *mut u32,
    ) -> c_int;
}

pub struct Resampler {
    state: *mut SpeexResamplerState,
    in_rate: u32,
    out_rate: u32,
}

// 只在采集线程内使用
unsafe impl Send for Resampler {}

impl Resampler {
    pub fn new(channels: u32, in_rate: u32, out_rate: u32) -> anyhow::Result<Self> {
        let mut err: c_int = 0;
        let state = unsafe {
            speex_resampler_init(
                channels,
                in_rate,
                out_rate,
                SPEEX_RESAMPLER_QUALITY_DEFAULT,
                &mut err,
            )
        };
        if err != RESAMPLER_ERR_SUCCESS || state.is_null() {
            anyhow::bail!("Failed to initialize speex resampler: err={}", err);
        }
        Ok(Self {
            state,
            in_rate,
            out_rate,
        })
    }

    /// Upper bound of output samples for `input_len` input samples.
    pub fn max_output(&self, input_len: usize) -> usize {
        (input_len as u64 * self.out_rate as u64).div_ceil(self.in_rate as u64) as usize + 64
    }

    /// Resample one channel of 16-bit PCM.
    ///
    /// Returns `(input_samples_consumed, output_samples_produced)`.
    pub fn process_int(
        &mut self,
        channel: u32,
        input: &[i16],
        output: &mut [i16],
    ) -> anyhow::Result<(u32, u32)> {
        let mut in_len = input.len() as u32;
        let mut out_len = output.len() as u32;
        let err = unsafe {
            speex_resampler_process_int(
                self.state,
                channel,
                input.as_ptr(),
                &mut in_len,
                output.as_mut_ptr(),
                &mut out_len,
            )
        };
        if err != RESAMPLER_ERR_SUCCESS {
            anyhow::bail!("Speex resampler error: {}", err);
        }
        Ok((in_len, out_len))
    }
}

impl Drop for Resampler {
    fn drop(&mut self) {
        unsafe {
            speex_resampler_destroy(self.state);
        }
    }
}
