//! Live weapon, mask and full-body detection served as an MJPEG stream.

pub mod html;
pub mod vision;
