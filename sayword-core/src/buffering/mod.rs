//! Lock-free SPSC ring between the device callback and the capture pump.
//!
//! `ringbuf::HeapRb<f32>` gives a wait-free `push_slice` that is safe to call
//! from a real-time audio callback.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half, owned by the device callback (or injected source).
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, owned by the capture pump thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^20 samples, about 21 s at 48 kHz. Quiz answers are a few seconds long.
pub const RING_CAPACITY: usize = 1 << 20;

pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
