/// Room capture module
///
/// This module handles:
/// - The capture device seam and its one-shot completion (device.rs)
/// - The session state machine that drives a device (session.rs)
/// - The raw room geometry a finished scan yields (room.rs)

pub mod device;
pub mod room;
pub mod session;

pub use device::{CaptureCompletion, CaptureConfig, CaptureDevice, ReplayDevice};
pub use room::{CapturedElement, ElementKind, RawCapture};
pub use session::{sensor_in_use, CaptureOutcome, CaptureSession, SessionState};
