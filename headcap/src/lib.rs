// This file makes `headcap` into a rust library crate.

// The file `main.rs` still exists to make `headcap` into an executable.

pub mod assets;
pub mod bake;
pub mod camera;
pub mod check_template;
pub mod deform;
pub mod export_obj;
pub mod gpu;
pub mod import_obj;
pub mod mesh;
pub mod pose;
pub mod session;
pub mod texture;

pub use base;
