//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;
pub mod resample;

pub use buffer::{AudioFrame, FrameAccumulator};
pub use capture::{CaptureContext, CapturePipeline, SharedCaptureContext};
pub use device::{list_devices, AudioBackend, AudioDeviceInfo, CpalBackend, InputDevice, NativeFormat, SampleSink};
pub use playback::{ChunkId, CompletionSender, CpalPlaybackContext, PlaybackContext};
