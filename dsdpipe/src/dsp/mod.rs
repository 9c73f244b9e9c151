//! DSP kernels: the one-bit decimation filter and sample-format
//! conversion at the sink boundary.

pub mod convert;
pub mod dsd2pcm;

pub use convert::{
    f64_to_f32_bytes, f64_to_i16_bytes, f64_to_i24_bytes, f64_to_i32_bytes, f64_to_i32_samples,
    payload_to_f64,
};
pub use dsd2pcm::Dsd2Pcm;
