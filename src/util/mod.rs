//! PNG reading and writing for the CLI and tests

pub mod image_write;

pub use image_write::{read_png_rgba8, write_png_rgba8, RgbaImage8};
