//! Vhost configuration: rendering and installation

pub mod render;
pub mod writer;

pub use render::{Backend, RenderMode, certificate_paths, render};
pub use writer::{remove_if_present, vhost_path, write_if_different};
