//! Frame geometry and the plane layout it implies.
//!
//! Geometry comes from format negotiation outside this crate. It is only
//! used here to size planes, validate buffers against them and fill in the
//! destination registers.
//!
//! | Code | bpp | Planes | Plane sizes |
//! |------|-----|--------|-------------|
//! | `Bayer8` | 8 | 1 | `w·h` |
//! | `Bayer10` | 10 | 1 | `w·h·10/8` |
//! | `Uyvy` | 16 | 1 | `2·w·h` |
//! | `Nv12` | 12 | 2 | `w·h`, `w·h/2` |
//! | `Yuv420` | 12 | 3 | `w·h`, `w·h/4`, `w·h/4` |

use crate::buffer::{DmaAddr, Plane, Planes};
use crate::constants::{DMA_ALIGN, MAX_PLANES};
use crate::error::{Mismatch, Result};
use crate::hw::DestinationRegs;

/// Pixel encoding of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelCode {
    /// Raw Bayer, 8 bits per sample.
    Bayer8,
    /// Raw Bayer, 10 bits per sample, packed.
    Bayer10,
    /// Packed 4:2:2 YUV.
    Uyvy,
    /// Semi-planar 4:2:0 (Y plane, interleaved UV plane).
    Nv12,
    /// Fully planar 4:2:0 (Y, U and V planes).
    Yuv420,
}

impl PixelCode {
    /// Average bits per pixel over all planes.
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            PixelCode::Bayer8 => 8,
            PixelCode::Bayer10 => 10,
            PixelCode::Uyvy => 16,
            PixelCode::Nv12 | PixelCode::Yuv420 => 12,
        }
    }

    pub const fn plane_count(self) -> usize {
        match self {
            PixelCode::Bayer8 | PixelCode::Bayer10 | PixelCode::Uyvy => 1,
            PixelCode::Nv12 => 2,
            PixelCode::Yuv420 => 3,
        }
    }

    /// Bits per pixel of the first (luma or packed) plane.
    const fn first_plane_bits(self) -> u32 {
        match self {
            PixelCode::Nv12 | PixelCode::Yuv420 => 8,
            other => other.bits_per_pixel(),
        }
    }
}

/// Frame size and encoding for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub code: PixelCode,
}

impl Geometry {
    pub const fn new(width: u32, height: u32, code: PixelCode) -> Self {
        Geometry {
            width,
            height,
            code,
        }
    }

    /// Compute the plane layout, rejecting empty or oversized frames.
    pub fn layout(&self) -> Result<PlaneLayout> {
        if self.width == 0 || self.height == 0 {
            return Err(Mismatch::EmptyGeometry.into());
        }
        let bits_per_line = self.width as u64 * self.code.first_plane_bits() as u64;
        let bytes_per_line = bits_per_line.div_ceil(8);
        let first = bytes_per_line * self.height as u64;

        let mut sizes = [0u64; MAX_PLANES];
        sizes[0] = first;
        match self.code {
            PixelCode::Nv12 => sizes[1] = first / 2,
            PixelCode::Yuv420 => {
                sizes[1] = first / 4;
                sizes[2] = first / 4;
            }
            _ => {}
        }

        let mut out = [0u32; MAX_PLANES];
        for (dst, src) in out.iter_mut().zip(sizes) {
            *dst = u32::try_from(src).map_err(|_| Mismatch::SizeOverflow)?;
        }
        Ok(PlaneLayout {
            count: self.code.plane_count() as u8,
            sizes: out,
            bytes_per_line: u32::try_from(bytes_per_line).map_err(|_| Mismatch::SizeOverflow)?,
        })
    }
}

/// Plane sizes and line pitch derived from a [`Geometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    count: u8,
    sizes: [u32; MAX_PLANES],
    bytes_per_line: u32,
}

impl PlaneLayout {
    pub fn plane_count(&self) -> usize {
        self.count as usize
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes[..self.count as usize]
    }

    pub fn bytes_per_line(&self) -> u32 {
        self.bytes_per_line
    }

    /// Size of the largest plane.
    pub fn largest(&self) -> u32 {
        self.sizes().iter().copied().max().unwrap_or(0)
    }

    /// Check that a buffer can hold one frame of this layout.
    pub fn check(&self, planes: &Planes) -> Result<()> {
        if planes.len() != self.plane_count() {
            return Err(Mismatch::PlaneCount {
                expected: self.count,
                found: planes.len() as u8,
            }
            .into());
        }
        for (i, (plane, &needed)) in planes.as_slice().iter().zip(self.sizes()).enumerate() {
            check_addr(plane.addr)?;
            if plane.len < needed {
                return Err(Mismatch::PlaneTooSmall {
                    plane: i as u8,
                    needed,
                    found: plane.len,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Register values that point every plane at a real buffer.
    pub fn regs(&self, planes: &Planes) -> DestinationRegs {
        let mut regs = self.empty_regs();
        for (dst, (src, &size)) in regs
            .planes
            .iter_mut()
            .zip(planes.as_slice().iter().zip(self.sizes()))
        {
            *dst = Plane::new(src.addr, size);
        }
        regs
    }

    /// Register values that point every plane at the same scratch area.
    pub fn dummy_regs(&self, addr: DmaAddr) -> DestinationRegs {
        let mut regs = self.empty_regs();
        for (dst, &size) in regs.planes.iter_mut().zip(self.sizes()) {
            *dst = Plane::new(addr, size);
        }
        regs
    }

    fn empty_regs(&self) -> DestinationRegs {
        DestinationRegs {
            planes: [Plane::default(); MAX_PLANES],
            count: self.count,
            bytes_per_line: self.bytes_per_line,
        }
    }
}

/// Reject null and misaligned DMA addresses.
pub(crate) fn check_addr(addr: DmaAddr) -> Result<()> {
    if addr == 0 || addr % DMA_ALIGN != 0 {
        return Err(Mismatch::Misaligned(addr).into());
    }
    Ok(())
}
