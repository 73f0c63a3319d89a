//! Core Rendering Types
//!
//! Plain enumerations and small descriptors shared by the state, command and
//! driver layers. Every type here is `Copy` and carries no driver handles.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ─── Fixed-function state values ──────────────────────────────────────────────

/// Blend factor used by the `Blending` state.
///
/// Two factors are packed into a single byte (source in the high nibble), so
/// every discriminant must fit into four bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BlendFactor {
    #[default]
    Disabled = 0,
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    DstColor,
    InvDstColor,
    SrcAlpha,
    InvSrcAlpha,
    DstAlpha,
    InvDstAlpha,
}

impl BlendFactor {
    const ALL: [Self; 11] = [
        Self::Disabled,
        Self::Zero,
        Self::One,
        Self::SrcColor,
        Self::InvSrcColor,
        Self::DstColor,
        Self::InvDstColor,
        Self::SrcAlpha,
        Self::InvSrcAlpha,
        Self::DstAlpha,
        Self::InvDstAlpha,
    ];

    /// Decodes a factor from its four-bit code. Unknown codes map to `Disabled`.
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self::ALL
            .get(usize::from(bits & 0xF))
            .copied()
            .unwrap_or(Self::Disabled)
    }
}

/// Comparison function used by alpha, depth and stencil tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compare {
    Always,
    Equal,
    Greater,
    GreaterEqual,
    Less,
    #[default]
    LessEqual,
    Never,
    NotEqual,
    /// The test is disabled.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilAction {
    DecSaturate,
    DecWrap,
    IncSaturate,
    IncWrap,
    Invert,
    #[default]
    Keep,
    Replace,
    Zero,
}

/// Triangle face selector (culling, stencil).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TriangleFace {
    Front,
    #[default]
    Back,
    FrontAndBack,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolygonMode {
    Wire,
    #[default]
    Fill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
    Quads,
    Points,
}

bitflags! {
    /// Buffers affected by a clear operation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ClearMask: u8 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
        const ALL     = Self::COLOR.bits() | Self::DEPTH.bits() | Self::STENCIL.bits();
    }
}

bitflags! {
    /// Colour channels written by draw calls.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        const RED   = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE  = 1 << 2;
        const ALPHA = 1 << 3;
        const RGB   = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits();
        const ALL   = Self::RGB.bits() | Self::ALPHA.bits();
    }
}

impl Default for ColorMask {
    fn default() -> Self {
        Self::ALL
    }
}

// ─── Textures ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    Texture1D,
    #[default]
    Texture2D,
    Texture3D,
    Cube,
}

impl fmt::Display for TextureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Texture1D => "1D",
            Self::Texture2D => "2D",
            Self::Texture3D => "3D",
            Self::Cube => "cube",
        };
        f.write_str(name)
    }
}

/// Pixel formats for textures and render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    Luminance8,
    Rgb8,
    #[default]
    Rgba8,
    /// DXT1, 8 bytes per 4x4 block with 1-bit alpha.
    Dxtc1,
    /// DXT3, 16 bytes per block.
    Dxtc3,
    /// DXT5, 16 bytes per block.
    Dxtc5,
    /// PVRTC, 2 bits per pixel.
    Pvrtc2,
    /// PVRTC, 4 bits per pixel.
    Pvrtc4,
    R16F,
    Rg16F,
    Rgba16F,
    R32F,
    Rg32F,
    Rgb32F,
    Rgba32F,
    /// 24-bit depth with 8 unused bits, used for framebuffer depth attachments.
    D24X8,
}

impl PixelFormat {
    #[must_use]
    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            Self::Dxtc1 | Self::Dxtc3 | Self::Dxtc5 | Self::Pvrtc2 | Self::Pvrtc4
        )
    }

    /// Bytes per pixel for uncompressed formats, `0` for block-compressed ones.
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Luminance8 => 1,
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::R32F | Self::D24X8 => 4,
            Self::R16F => 2,
            Self::Rg16F => 4,
            Self::Rgba16F | Self::Rg32F => 8,
            Self::Rgb32F => 12,
            Self::Rgba32F => 16,
            Self::Dxtc1 | Self::Dxtc3 | Self::Dxtc5 | Self::Pvrtc2 | Self::Pvrtc4 => 0,
        }
    }

    /// Bytes per 4x4 block for compressed formats, `0` otherwise.
    #[must_use]
    pub fn bytes_per_block(self) -> usize {
        match self {
            Self::Dxtc1 | Self::Pvrtc2 | Self::Pvrtc4 => 8,
            Self::Dxtc3 | Self::Dxtc5 => 16,
            _ => 0,
        }
    }

    /// Size of a full mip chain of `mip_levels` levels starting at `width`x`height`.
    #[must_use]
    pub fn bytes_per_mip_chain(self, width: u16, height: u16, mip_levels: u16) -> usize {
        let mut width = usize::from(width);
        let mut height = usize::from(height);
        let mut total = 0;

        for _ in 0..mip_levels.max(1) {
            total += if self.is_compressed() {
                width.div_ceil(4) * height.div_ceil(4) * self.bytes_per_block()
            } else {
                width * height * self.bytes_per_pixel()
            };
            width = (width / 2).max(1);
            height = (height / 2).max(1);
        }

        total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFilter {
    Nearest,
    #[default]
    Linear,
    Bilinear,
    Trilinear,
}

/// Side of a cube map used as a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeMapSide {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

/// Flattened texture descriptor: type, dimensions and format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub ty: TextureType,
    pub width: u16,
    pub height: u16,
    pub format: PixelFormat,
    pub filter: TextureFilter,
    pub mip_levels: u16,
}

impl TextureDesc {
    #[must_use]
    pub fn texture_2d(width: u16, height: u16, format: PixelFormat) -> Self {
        Self {
            ty: TextureType::Texture2D,
            width,
            height,
            format,
            filter: TextureFilter::Linear,
            mip_levels: 1,
        }
    }

    #[must_use]
    pub fn cube(size: u16, format: PixelFormat) -> Self {
        Self {
            ty: TextureType::Cube,
            width: size,
            height: size,
            format,
            filter: TextureFilter::Linear,
            mip_levels: 1,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: TextureFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_mip_levels(mut self, mip_levels: u16) -> Self {
        self.mip_levels = mip_levels;
        self
    }
}

// ─── Viewports ────────────────────────────────────────────────────────────────

/// Viewport rectangle expressed as fractions of the render target size.
///
/// Recorded at command-buffer time and resolved against the concrete target
/// size at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedViewport {
    /// Left side of the rectangle.
    pub x: f32,
    /// Lower side of the rectangle.
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedViewport {
    /// Covers the whole target.
    pub const FULL: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Converts to pixels for a target of the given size.
    #[must_use]
    pub fn denormalize(&self, target_width: u32, target_height: u32) -> Viewport {
        let w = target_width as f32;
        let h = target_height as f32;
        Viewport {
            x: (self.x * w) as i32,
            y: (self.y * h) as i32,
            width: (self.width * w) as u32,
            height: (self.height * h) as u32,
        }
    }
}

impl Default for NormalizedViewport {
    fn default() -> Self {
        Self::FULL
    }
}

/// Viewport rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    #[must_use]
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

// ─── Shaders ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}
