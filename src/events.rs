use std::path::PathBuf;

/// Request to decode the image bound to texture slot `slot`.
#[derive(Debug, Clone)]
pub struct LoadImage {
    pub slot: usize,
    pub path: PathBuf,
    pub max_dimension: u32,
}

#[derive(Debug, Clone)]
pub struct PreparedImageCpu {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Decoded RGBA8 pixels ready for upload into `slot`.
#[derive(Debug, Clone)]
pub struct ImageLoaded {
    pub slot: usize,
    pub prepared: PreparedImageCpu,
}
