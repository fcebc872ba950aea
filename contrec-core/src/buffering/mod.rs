//! Lock-free SPSC ring buffer for captured PCM samples.
//!
//! Uses `ringbuf::HeapRb<i16>` which provides a wait-free `push_slice`
//! safe to call from the real-time audio callback.

pub mod block;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Type alias for the producer half — held by the audio callback thread.
pub type CaptureProducer = ringbuf::HeapProd<i16>;

/// Type alias for the consumer half — held by the capture loop thread.
pub type CaptureConsumer = ringbuf::HeapCons<i16>;

/// Buffer capacity: 2^21 = 2 097 152 i16 samples ≈ 47.5 s at 44.1 kHz.
/// A synchronous encode at a segment boundary pauses draining; the ring
/// must absorb that pause without the callback dropping samples.
pub const RING_CAPACITY: usize = 1 << 21;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
///
/// # Panics
/// Never panics — `HeapRb` construction cannot fail for reasonable capacities.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    HeapRb::<i16>::new(RING_CAPACITY).split()
}
