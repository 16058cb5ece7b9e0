use std::fs::{read, File};
use std::path::Path;

use crate::defs::{IntoResult, Result};

pub fn open_file<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();
    File::open(path).res(|| {
        format!("failed to open file '{}'", path.to_string_lossy())
    })
}

pub fn create_file<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();
    File::create(path).res(|| {
        format!("failed to create file '{}'", path.to_string_lossy())
    })
}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    read(path).res(|| {
        format!("failed to read file '{}'", path.to_string_lossy())
    })
}

pub fn write_file<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, data).res(|| {
        format!("failed to write file '{}'", path.to_string_lossy())
    })
}
