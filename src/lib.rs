// This is free and unencumbered software released into the public domain.

//! Time-lapse camera: capture stills from a video device, convert them to
//! JPEG, preview them on a framebuffer, and ship them to a remote host.

pub mod cli;
pub mod shared;
