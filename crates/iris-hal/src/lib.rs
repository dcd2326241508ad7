//! `iris-hal` – capture hardware and classifier seams.
//!
//! Everything the pipeline needs from the outside world is expressed as a
//! trait here so that tests and the CLI can substitute simulated drivers.
//!
//! # Modules
//!
//! - [`frame`] – [`FrameBuffer`]: a borrowed, per-step view of one camera
//!   frame, and [`ImageInput`]: the owned copy handed to the classifier.
//! - [`device`] – [`CaptureDevice`]: authorization, session wiring, streaming,
//!   torch and still capture.  Frames are pushed into a [`FrameSink`].
//! - [`classifier`] – [`Classifier`]: the opaque image → ranked labels engine.
//! - [`clock`] – [`Clock`]: injectable monotonic and wall time.
//! - [`sim`] – [`SimCaptureDevice`][sim::SimCaptureDevice] and
//!   [`SimClassifier`][sim::SimClassifier] for headless runs.

pub mod classifier;
pub mod clock;
pub mod device;
pub mod frame;
pub mod sim;

pub use classifier::Classifier;
pub use clock::{Clock, ManualClock, SystemClock};
pub use device::{CaptureDevice, DeviceInfo, FrameSink, StillCompletion, StillSettings};
pub use frame::{FrameBuffer, ImageInput, PixelFormat};
pub use sim::{SimCall, SimCaptureDevice, SimClassifier};
