//! LED canvas and frame tracking.
//!
//! Programs draw into a [`Canvas`] of 32-bit ARGB pixels. On each repaint the
//! canvas is packed to the device's 16-bit little-endian RGB565 layout and
//! diffed against the last frame that was sent.

use crate::protocol::{
    delta::{compute_delta_packets_with, ChangePacket, DeltaError, DeltaOptions},
    PacketCounter,
};

/// Side length, in pixels, of the square a pressure point covers.
const PRESSURE_POINT_SIZE: i32 = 5;

/// Pressure points older than this many repaints are dropped.
const PRESSURE_POINT_MAX_AGE: u32 = 10;

/// Largest coordinate a touch can report on either axis.
const TOUCH_COORDINATE_MAX: f32 = 4095.0;

/// A 32-bit `0xAARRGGBB` color.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub u32);

impl Color {
    pub const TRANSPARENT: Self = Self(0);
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(0xFF, 0xFF, 0xFF);

    pub const fn argb(alpha: u8, red: u8, green: u8, blue: u8) -> Self {
        Self((alpha as u32) << 24 | (red as u32) << 16 | (green as u32) << 8 | blue as u32)
    }

    /// An opaque color.
    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self::argb(0xFF, red, green, blue)
    }

    pub const fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn red(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn blue(self) -> u8 {
        self.0 as u8
    }

    /// The same color with full alpha.
    pub const fn opaque(self) -> Self {
        Self(self.0 | 0xFF00_0000)
    }

    /// Converts to the device's RGB565 layout (`b5 g6 r5`, red in the low
    /// bits) with alpha premultiplied.
    pub fn to_rgb565(self) -> u16 {
        let alpha = u32::from(self.alpha());
        let scale = |channel: u8| u32::from(channel) * alpha / 0xFF;

        let r = (scale(self.red()) >> 3) & 0x1F;
        let g = (scale(self.green()) >> 2) & 0x3F;
        let b = (scale(self.blue()) >> 3) & 0x1F;
        ((b << 11) | (g << 5) | r) as u16
    }

    /// Composites `overlay` on top of `self` (source-over).
    pub fn blend(self, overlay: Self) -> Self {
        let top_alpha = f32::from(overlay.alpha()) / 255.0;
        let base_alpha = f32::from(self.alpha()) / 255.0 * (1.0 - top_alpha);
        let alpha = top_alpha + base_alpha;
        if alpha <= 0.0 {
            return Self::TRANSPARENT;
        }

        let channel = |top: u8, base: u8| {
            ((f32::from(top) * top_alpha + f32::from(base) * base_alpha) / alpha).round() as u8
        };

        Self::argb(
            (alpha * 255.0).round() as u8,
            channel(overlay.red(), self.red()),
            channel(overlay.green(), self.green()),
            channel(overlay.blue(), self.blue()),
        )
    }

    /// Weighted per-channel average of two colors.
    pub fn mix(self, other: Self, weight: u32, other_weight: u32) -> Self {
        let total = weight + other_weight;
        if total == 0 {
            return self;
        }

        let channel = |a: u8, b: u8| {
            ((u32::from(a) * weight + u32::from(b) * other_weight + total / 2) / total) as u8
        };

        Self::argb(
            channel(self.alpha(), other.alpha()),
            channel(self.red(), other.red()),
            channel(self.green(), other.green()),
            channel(self.blue(), other.blue()),
        )
    }
}

impl From<u32> for Color {
    fn from(argb: u32) -> Self {
        Self(argb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PressurePoint {
    x: f32,
    y: f32,
    z: f32,
    color: Color,
    age: u32,
}

/// A drawable LED matrix.
///
/// Coordinates are signed so shapes may hang off any edge; pixels outside the
/// matrix are clipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<Color>,
    pressure_points: Vec<PressurePoint>,
}

impl Canvas {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![Color::TRANSPARENT; width * height],
            pressure_points: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major pixels.
    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Color] {
        &mut self.pixels
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        let x = usize::try_from(x).ok().filter(|x| *x < self.width)?;
        let y = usize::try_from(y).ok().filter(|y| *y < self.height)?;
        Some(x + y * self.width)
    }

    /// Returns the pixel at `(x, y)`, or [`Color::TRANSPARENT`] outside the
    /// matrix.
    pub fn pixel(&self, x: i32, y: i32) -> Color {
        self.index(x, y)
            .map_or(Color::TRANSPARENT, |index| self.pixels[index])
    }

    /// Sets a pixel. The color is always stored opaque.
    pub fn fill_pixel(&mut self, color: Color, x: i32, y: i32) {
        if let Some(index) = self.index(x, y) {
            self.pixels[index] = color.opaque();
        }
    }

    /// Blends `color` over the pixel and stores the result opaque.
    pub fn blend_pixel(&mut self, color: Color, x: i32, y: i32) {
        if let Some(index) = self.index(x, y) {
            self.pixels[index] = self.pixels[index].blend(color).opaque();
        }
    }

    pub fn fill_rect(&mut self, color: Color, x: i32, y: i32, width: i32, height: i32) {
        for j in y..y + height {
            for i in x..x + width {
                self.fill_pixel(color, i, j);
            }
        }
    }

    pub fn blend_rect(&mut self, color: Color, x: i32, y: i32, width: i32, height: i32) {
        for j in y..y + height {
            for i in x..x + width {
                self.blend_pixel(color, i, j);
            }
        }
    }

    /// Blends a rectangle whose corners take the given colors, interpolating
    /// bilinearly between them.
    #[allow(clippy::too_many_arguments)]
    pub fn blend_gradient_rect(
        &mut self,
        north_west: Color,
        north_east: Color,
        south_west: Color,
        south_east: Color,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) {
        let weight = |distance: i32| distance.max(0) as u32;

        for j in y..y + height {
            let (top, bottom) = (weight(y + height - 1 - j), weight(j - y));
            let west = north_west.mix(south_west, top, bottom);
            let east = north_east.mix(south_east, top, bottom);

            for i in x..x + width {
                let (left, right) = (weight(x + width - 1 - i), weight(i - x));
                self.blend_pixel(west.mix(east, left, right), i, j);
            }
        }
    }

    /// Fills the whole matrix with an opaque color.
    pub fn clear(&mut self, color: Color) {
        self.pixels.fill(color.opaque());
    }

    /// Records a touch-sized splash of color at touch coordinates (`0..=4095`
    /// on each axis, pressure `0..=255`).
    pub fn add_pressure_point(&mut self, color: Color, x: f32, y: f32, z: f32) {
        self.pressure_points.push(PressurePoint {
            x,
            y,
            z,
            color,
            age: 0,
        });
    }

    /// Blends every live pressure point into the canvas, fainter with age.
    pub fn draw_pressure_map(&mut self) {
        let offset = (PRESSURE_POINT_SIZE - 1) / 2;

        for point in self.pressure_points.clone() {
            let x = (self.width as f32 * point.x / TOUCH_COORDINATE_MAX).floor() as i32;
            let y = (self.height as f32 * point.y / TOUCH_COORDINATE_MAX).floor() as i32;
            let alpha = f32::from(point.color.alpha()) * (point.z / 255.0) / (point.age + 1) as f32;

            let color = Color::argb(
                alpha.floor().clamp(0.0, 255.0) as u8,
                point.color.red(),
                point.color.green(),
                point.color.blue(),
            );
            self.blend_rect(
                color,
                x - offset,
                y - offset,
                PRESSURE_POINT_SIZE,
                PRESSURE_POINT_SIZE,
            );
        }
    }

    /// Ages every pressure point by one repaint and drops expired ones.
    pub fn fade_pressure_map(&mut self) {
        for point in &mut self.pressure_points {
            point.age += 1;
        }
        self.pressure_points
            .retain(|point| point.age <= PRESSURE_POINT_MAX_AGE);
    }

    pub fn pressure_point_count(&self) -> usize {
        self.pressure_points.len()
    }

    /// Packs the canvas into device bitmap bytes.
    pub fn to_rgb565_bytes(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|pixel| pixel.to_rgb565().to_le_bytes())
            .collect()
    }

    fn reset(&mut self) {
        self.pixels.fill(Color::TRANSPARENT);
        self.pressure_points.clear();
    }
}

/// The result of one repaint tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame differed from the last one sent and a burst of this many
    /// change-list packets was queued for the device.
    Committed { packets: usize },
    /// The previous burst is still unacknowledged, so this frame was discarded.
    Dropped,
    /// Nothing changed since the last frame sent.
    Unchanged,
}

/// A canvas plus the bitmap bytes last committed to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct LedDisplay {
    canvas: Canvas,
    sent: Vec<u8>,
    data_offset: usize,
}

impl LedDisplay {
    pub fn new(width: usize, height: usize, data_offset: usize) -> Self {
        Self {
            canvas: Canvas::new(width, height),
            sent: vec![0; width * height * 2],
            data_offset,
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    /// Bitmap bytes of the last committed frame.
    pub fn sent_bytes(&self) -> &[u8] {
        &self.sent
    }

    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    /// Forgets the canvas and assumes a blank device bitmap.
    pub fn reset(&mut self) {
        self.canvas.reset();
        self.sent.fill(0);
    }

    /// Diffs the canvas against the last committed frame.
    ///
    /// Returns `None` when nothing changed. Otherwise the canvas becomes the
    /// committed frame and the change-list burst that produces it is returned.
    ///
    /// # Errors
    ///
    /// Fails if `options` carries a packet budget too small for any change.
    pub fn commit(
        &mut self,
        start_index: PacketCounter,
        options: &DeltaOptions,
    ) -> Result<Option<Vec<ChangePacket>>, DeltaError> {
        let frame = self.canvas.to_rgb565_bytes();
        if frame == self.sent {
            return Ok(None);
        }

        let packets = compute_delta_packets_with(
            &frame,
            &self.sent,
            self.data_offset,
            frame.len(),
            start_index,
            options,
        )?;
        self.sent = frame;
        Ok(Some(packets))
    }
}

#[cfg(test)]
mod tests {
    use super::{Canvas, Color, LedDisplay};
    use crate::protocol::{
        delta::{apply_change_list, DeltaOptions},
        PacketCounter,
    };

    #[test]
    fn packs_rgb565() {
        assert_eq!(Color::WHITE.to_rgb565(), 0xFFFF);
        assert_eq!(Color::rgb(0xFF, 0, 0).to_rgb565(), 0x001F);
        assert_eq!(Color::rgb(0, 0xFF, 0).to_rgb565(), 0x07E0);
        assert_eq!(Color::rgb(0, 0, 0xFF).to_rgb565(), 0xF800);
        assert_eq!(Color::argb(0, 0xFF, 0xFF, 0xFF).to_rgb565(), 0);
    }

    #[test]
    fn blends() {
        let red = Color::rgb(0xFF, 0, 0);
        let blue = Color::rgb(0, 0, 0xFF);

        assert_eq!(red.blend(blue), blue);
        assert_eq!(red.blend(Color::TRANSPARENT), red);
        assert_eq!(Color::TRANSPARENT.blend(Color::TRANSPARENT), Color::TRANSPARENT);
        assert_eq!(
            Color::BLACK.blend(Color::argb(0x80, 0xFF, 0xFF, 0xFF)),
            Color::rgb(0x80, 0x80, 0x80)
        );
    }

    #[test]
    fn blended_pixels_are_stored_opaque() {
        let mut canvas = Canvas::new(2, 1);
        canvas.blend_pixel(Color::argb(0x80, 0xFF, 0xFF, 0xFF), 0, 0);
        assert_eq!(canvas.pixel(0, 0), Color::WHITE);

        // The second blend sees an opaque white base, not a translucent one.
        canvas.blend_pixel(Color::argb(0x80, 0, 0, 0), 0, 0);
        assert_eq!(canvas.pixel(0, 0), Color::rgb(0x7F, 0x7F, 0x7F));

        canvas.blend_rect(Color::TRANSPARENT, 0, 0, 2, 1);
        assert_eq!(canvas.pixel(1, 0), Color::BLACK);
    }

    #[test]
    fn clips_drawing() {
        let mut canvas = Canvas::new(3, 2);
        canvas.fill_rect(Color(0x00_12_34_56), -1, -1, 3, 2);

        assert_eq!(canvas.pixel(0, 0), Color(0xFF_12_34_56));
        assert_eq!(canvas.pixel(1, 0), Color(0xFF_12_34_56));
        assert_eq!(canvas.pixel(2, 0), Color::TRANSPARENT);
        assert_eq!(canvas.pixel(0, 1), Color::TRANSPARENT);
        assert_eq!(canvas.pixel(5, 5), Color::TRANSPARENT);
    }

    #[test]
    fn gradient_corners() {
        let mut canvas = Canvas::new(2, 2);
        canvas.clear(Color::BLACK);
        canvas.blend_gradient_rect(
            Color::rgb(0xFF, 0, 0),
            Color::rgb(0, 0xFF, 0),
            Color::rgb(0, 0, 0xFF),
            Color::WHITE,
            0,
            0,
            2,
            2,
        );

        assert_eq!(canvas.pixel(0, 0), Color::rgb(0xFF, 0, 0));
        assert_eq!(canvas.pixel(1, 0), Color::rgb(0, 0xFF, 0));
        assert_eq!(canvas.pixel(0, 1), Color::rgb(0, 0, 0xFF));
        assert_eq!(canvas.pixel(1, 1), Color::WHITE);
    }

    #[test]
    fn pressure_points_fade() {
        let mut canvas = Canvas::new(15, 15);
        canvas.add_pressure_point(Color::WHITE, 2048.0, 2048.0, 255.0);
        canvas.draw_pressure_map();

        assert_eq!(canvas.pixel(7, 7), Color::WHITE);
        assert_eq!(canvas.pixel(5, 5), Color::WHITE);
        assert_eq!(canvas.pixel(4, 4), Color::TRANSPARENT);

        for _ in 0..10 {
            canvas.fade_pressure_map();
        }
        assert_eq!(canvas.pressure_point_count(), 1);
        canvas.fade_pressure_map();
        assert_eq!(canvas.pressure_point_count(), 0);
    }

    #[test]
    fn commits_only_changes() {
        let mut display = LedDisplay::new(15, 15, 113);
        let options = DeltaOptions::default();

        assert_eq!(display.commit(PacketCounter::new(3), &options), Ok(None));

        display.canvas_mut().fill_pixel(Color::WHITE, 1, 0);
        let packets = display
            .commit(PacketCounter::new(3), &options)
            .unwrap()
            .unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].index, PacketCounter::new(3));
        assert_eq!(&display.sent_bytes()[..4], &[0, 0, 0xFF, 0xFF]);

        let mut heap = vec![0; 113 + 450];
        apply_change_list(packets[0].as_bytes(), &mut heap).unwrap();
        assert_eq!(&heap[113..], display.sent_bytes());

        assert_eq!(display.commit(PacketCounter::new(4), &options), Ok(None));
    }
}
