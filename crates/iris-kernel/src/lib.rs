//! `iris-kernel` – session lifecycle and device arbitration.
//!
//! Owns the camera session and decides what may touch the hardware and
//! when.  It runs no inference.
//!
//! # Modules
//!
//! - [`authorization`] – [`AuthorizationGate`][authorization::AuthorizationGate]:
//!   records the platform's camera permission and enforces its one-way
//!   transitions.
//! - [`device_lock`] – [`DeviceLock`][device_lock::DeviceLock]: fail-fast
//!   exclusive access to device configuration, shared by session wiring,
//!   torch control and still capture.
//! - [`session`] – [`CaptureSession`][session::CaptureSession]: the capture
//!   session controller (authorization, one-time configuration, idempotent
//!   start/stop serialized on a session queue, torch).

pub mod authorization;
pub mod device_lock;
pub mod session;

pub use authorization::AuthorizationGate;
pub use device_lock::{DeviceLock, DeviceLockGuard};
pub use session::{CaptureSession, SessionConfig};
