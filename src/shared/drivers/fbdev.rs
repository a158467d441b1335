// This is free and unencumbered software released into the public domain.

//! Linux framebuffer (`/dev/fbN`) as a display surface.

use crate::shared::{CameraError, SURFACE_BYTES_PER_PIXEL, Surface};
use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::AsRawFd,
    ptr::NonNull,
};

const FBIOGET_VSCREENINFO: libc::c_ulong = 0x4600;
const FBIOGET_FSCREENINFO: libc::c_ulong = 0x4602;

#[repr(C)]
#[derive(Clone, Copy, Default)]
#[allow(dead_code)]
struct FbBitfield {
    offset: u32,
    length: u32,
    msb_right: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
#[allow(dead_code)]
struct FbVarScreenInfo {
    xres: u32,
    yres: u32,
    xres_virtual: u32,
    yres_virtual: u32,
    xoffset: u32,
    yoffset: u32,
    bits_per_pixel: u32,
    grayscale: u32,
    red: FbBitfield,
    green: FbBitfield,
    blue: FbBitfield,
    transp: FbBitfield,
    nonstd: u32,
    activate: u32,
    height: u32,
    width: u32,
    accel_flags: u32,
    pixclock: u32,
    left_margin: u32,
    right_margin: u32,
    upper_margin: u32,
    lower_margin: u32,
    hsync_len: u32,
    vsync_len: u32,
    sync: u32,
    vmode: u32,
    rotate: u32,
    colorspace: u32,
    reserved: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
#[allow(dead_code)]
struct FbFixScreenInfo {
    id: [u8; 16],
    smem_start: libc::c_ulong,
    smem_len: u32,
    type_: u32,
    type_aux: u32,
    visual: u32,
    xpanstep: u16,
    ypanstep: u16,
    ywrapstep: u16,
    line_length: u32,
    mmio_start: libc::c_ulong,
    mmio_len: u32,
    accel: u32,
    capabilities: u16,
    reserved: [u16; 2],
}

fn fb_ioctl<T>(file: &File, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    // SAFETY: `arg` is a live `repr(C)` struct matching `request`.
    let r = unsafe { libc::ioctl(file.as_raw_fd(), request as _, arg as *mut T as *mut libc::c_void) };
    if r == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub struct FramebufferSurface {
    ptr: NonNull<u8>,
    len: usize,
    width: usize,
    height: usize,
    stride: usize,
    _file: File,
}

// SAFETY: the mapping is owned by this value alone.
unsafe impl Send for FramebufferSurface {}

impl core::fmt::Debug for FramebufferSurface {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FramebufferSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish()
    }
}

impl FramebufferSurface {
    pub fn open(path: impl AsRef<str>) -> Result<Self, CameraError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| CameraError::DeviceOpen {
                path: path.to_string(),
                source,
            })?;

        let mut fix = FbFixScreenInfo::default();
        fb_ioctl(&file, FBIOGET_FSCREENINFO, &mut fix)
            .map_err(|e| CameraError::driver("reading fixed screen info", e))?;
        let mut var = FbVarScreenInfo::default();
        fb_ioctl(&file, FBIOGET_VSCREENINFO, &mut var)
            .map_err(|e| CameraError::driver("reading variable screen info", e))?;

        if var.bits_per_pixel as usize != SURFACE_BYTES_PER_PIXEL * 8 {
            return Err(CameraError::invalid_config(format!(
                "{path} is {} bpp; only 32 bpp framebuffers are supported",
                var.bits_per_pixel
            )));
        }

        let stride = match fix.line_length as usize / SURFACE_BYTES_PER_PIXEL {
            0 => var.xres as usize,
            n => n,
        };
        let len = stride * var.yres as usize * SURFACE_BYTES_PER_PIXEL;

        // SAFETY: shared mapping of the framebuffer memory; the driver checks
        // the length.
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CameraError::BufferMap(io::Error::last_os_error()));
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| CameraError::BufferMap(io::Error::other("null framebuffer mapping")))?;

        Ok(Self {
            ptr,
            len,
            width: var.xres as usize,
            height: var.yres as usize,
            stride,
            _file: file,
        })
    }
}

impl Surface for FramebufferSurface {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        // SAFETY: `len` bytes are mapped for as long as `self` lives.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for FramebufferSurface {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly what `open` mapped.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}
