//! Multi-camera capture orchestration and planar-to-RGB conversion.
//!
//! The core coordinates one asynchronous capture session per camera device
//! and decodes every delivered 4:2:0 planar buffer into a dense RGB frame.
//! Hardware is reached only through the injected [`hal::CameraHal`]
//! capability; [`sim::SimulatedRig`] provides an in-process implementation
//! for demos and tests.
//!
//! Two acquisition modes share the same session machinery:
//! [`orchestrator::SnapshotCapture`] blocks per device up to a deadline for
//! one bounded snapshot across all cameras, while
//! [`orchestrator::MultiCamWatcher`] keeps every camera streaming and serves
//! non-blocking latest-frame reads. [`orchestrator::LogicalCameraStream`]
//! additionally streams a logical multi-camera device to a subscriber.

pub mod config;
pub mod convert;
pub mod engine;
pub mod frame;
pub mod hal;
pub mod orchestrator;
pub mod session;
pub mod sim;
pub mod store;
