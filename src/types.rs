/// RGB color on the 0..1 scale used by PDF paint operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const RED: Color = Color {
        r: 1.0,
        g: 0.0,
        b: 0.0,
    };
}

/// RGB color on the 0..255 scale used by the raster compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    pub const BLACK: Rgb8 = Rgb8 { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_unit(self) -> Color {
        Color {
            r: self.r as f32 / 255.0,
            g: self.g as f32 / 255.0,
            b: self.b as f32 / 255.0,
        }
    }

    /// Adds `delta` to every channel, saturating at both ends.
    pub fn shifted(self, delta: i16) -> Self {
        let s = |c: u8| (c as i16 + delta).clamp(0, 255) as u8;
        Self {
            r: s(self.r),
            g: s(self.g),
            b: s(self.b),
        }
    }
}

/// Page dimensions in the active back-end's units: pixels for the raster
/// path, points for the vector path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
}

impl PageGeometry {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Unrotated bounding box of the rendered watermark text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextExtent {
    pub width: f32,
    pub height: f32,
}

impl TextExtent {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifted_saturates_both_ends() {
        let c = Rgb8::new(200, 30, 128);
        assert_eq!(c.shifted(100), Rgb8::new(255, 130, 228));
        assert_eq!(c.shifted(-50), Rgb8::new(150, 0, 78));
    }

    #[test]
    fn unit_and_byte_forms_agree() {
        let c = Rgb8::new(255, 0, 128);
        let unit = c.to_unit();
        assert_eq!(unit.r, 1.0);
        assert_eq!(unit.g, 0.0);
        assert!((unit.b - 128.0 / 255.0).abs() < 1e-6);
    }
}
