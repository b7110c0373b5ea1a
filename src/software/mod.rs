//! CPU backend: a command-recording device that runs the reference MLAA kernels.
//!
//! Used by the CLI and by the tests; it needs no GPU and its output is bit-exact
//! across runs.

pub mod device;
pub mod image;
pub mod kernels;
pub mod program;
pub mod tracker;

pub use device::{
    DeviceCommand, Fault, ResourceId, SoftwareDevice, SoftwareSurface, SoftwareTexture,
    SoftwareVertexLayout,
};
pub use image::SoftImage;
pub use program::{FragmentContext, Kernel, ParameterKind, SoftwareEffect, SoftwareProgram};
pub use tracker::{ResourceKind, ResourceStats};
