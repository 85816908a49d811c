//! NVDEC hardware decoder.
//!
//! The CUVID parser drives three callbacks:
//!
//! 1. **Sequence** — creates (or re-creates, on a format change) the
//!    hardware decoder and this camera's surface pool.
//! 2. **Decode** — submits a parsed picture to the hardware.
//! 3. **Display** — copies the decoded picture into a free pool surface
//!    and queues it for [`NvdecDecoder::get_frame`].
//!
//! nvcuvid is loaded at runtime, so hosts without NVIDIA hardware fall
//! back to the software decoder instead of failing to start.
//!
//! Context discipline: `decode` and `flush` drive the parser and must
//! run on a thread with a CUDA context current — in this pipeline, a
//! decode-pool worker; inside the parser callbacks that context is
//! already current. `set_quality` re-allocates the surface pool
//! synchronously under the frame mutex, pushing and popping the
//! decoder's own context around the driver calls, so it (like
//! `get_frame` and `reset`, which touch only mutex-guarded state) may
//! run from any thread.

pub mod decoder;
pub mod ffi;

pub use decoder::NvdecDecoder;
pub use ffi::{cuvid_library, CuvidLibrary};
