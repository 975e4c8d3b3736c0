//! Coordinate systems and the reconciler between them.
//!
//! Three spaces are kept apart as distinct types so they cannot be mixed:
//!
//! - **Image pixels**: top-left origin at a render DPI. What a viewer or
//!   rasterizer hands us.
//! - **User space**: top-left origin at 72 DPI, rotation applied. Identical
//!   scale to device space; supplied by UI callers.
//! - **Device space**: top-left origin at 72 DPI with the page rotation
//!   already applied - the visual coordinates of the rendered page.
//!
//! Content streams natively use a fourth frame (bottom-left origin, before
//! rotation); [`PageGeometry`] maps between that frame and device space.
//! The rotation cases follow the PDF.js viewport transform.

use crate::core::error::{RedactError, RedactResult};
use serde::{Deserialize, Serialize};

/// Affine transform `[a b c d e f]` in the PDF row-vector convention:
/// `(x', y') = (a·x + c·y + e, b·x + d·y + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix(pub [f64; 6]);

impl Matrix {
    pub const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    pub fn translation(tx: f64, ty: f64) -> Matrix {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    pub fn scale(sx: f64, sy: f64) -> Matrix {
        Matrix([sx, 0.0, 0.0, sy, 0.0, 0.0])
    }

    /// `self` applied first, then `after`.
    pub fn then(&self, after: &Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = after.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    pub fn determinant(&self) -> f64 {
        let [a, b, c, d, _, _] = self.0;
        a * d - b * c
    }

    pub fn invert(&self) -> Option<Matrix> {
        let [a, b, c, d, e, f] = self.0;
        let det = a * d - b * c;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let ia = d / det;
        let ib = -b / det;
        let ic = -c / det;
        let id = a / det;
        let ie = -(e * ia + f * ic);
        let if_ = -(e * ib + f * id);
        Some(Matrix([ia, ib, ic, id, ie, if_]))
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

/// Plain rectangle `(x, y, width, height)`; meaning depends on the tagged
/// wrapper it travels in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Rect {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }

    fn validated(&self) -> RedactResult<()> {
        if !self.is_finite() {
            return Err(RedactError::invalid_coordinate("non-finite rectangle"));
        }
        if self.width < 0.0 || self.height < 0.0 {
            return Err(RedactError::invalid_coordinate(
                "negative rectangle dimensions",
            ));
        }
        Ok(())
    }
}

/// Rectangle in image pixels (top-left origin) at a specific render DPI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageRect {
    pub rect: Rect,
    pub dpi: f64,
}

/// Rectangle in viewer user space: top-left origin, 72 DPI, rotation
/// applied. Same frame as device space at zoom 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserRect(pub Rect);

/// Rectangle in page device space: top-left origin, 72 DPI, rotation
/// applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceRect(pub Rect);

impl DeviceRect {
    /// Closed-rectangle containment test used for glyph centers.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let r = &self.0;
        x >= r.x && x <= r.x + r.width && y >= r.y && y <= r.y + r.height
    }
}

/// Axis-aligned bounding box in device space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub const EMPTY: BBox = BBox {
        x0: f64::MAX,
        y0: f64::MAX,
        x1: f64::MIN,
        y1: f64::MIN,
    };

    pub fn from_points(points: &[(f64, f64)]) -> BBox {
        let mut bbox = BBox::EMPTY;
        for &(x, y) in points {
            bbox.add_point(x, y);
        }
        bbox
    }

    pub fn add_point(&mut self, x: f64, y: f64) {
        self.x0 = self.x0.min(x);
        self.y0 = self.y0.min(y);
        self.x1 = self.x1.max(x);
        self.y1 = self.y1.max(y);
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x0 > self.x1 || self.y0 > self.y1
    }

    pub fn is_finite(&self) -> bool {
        self.x0.is_finite() && self.y0.is_finite() && self.x1.is_finite() && self.y1.is_finite()
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Overlap area with a device rectangle.
    pub fn intersection_area(&self, rect: &DeviceRect) -> f64 {
        let r = &rect.0;
        let x0 = self.x0.max(r.x);
        let y0 = self.y0.max(r.y);
        let x1 = self.x1.min(r.x + r.width);
        let y1 = self.y1.min(r.y + r.height);
        if x1 <= x0 || y1 <= y0 {
            0.0
        } else {
            (x1 - x0) * (y1 - y0)
        }
    }

    pub fn intersects(&self, rect: &DeviceRect) -> bool {
        let r = &rect.0;
        !self.is_empty()
            && self.x0 <= r.x + r.width
            && self.x1 >= r.x
            && self.y0 <= r.y + r.height
            && self.y1 >= r.y
    }

    /// Whether this bbox covers the whole rectangle (with slack).
    pub fn covers(&self, rect: &DeviceRect, tolerance: f64) -> bool {
        let r = &rect.0;
        self.x0 <= r.x + tolerance
            && self.y0 <= r.y + tolerance
            && self.x1 >= r.x + r.width - tolerance
            && self.y1 >= r.y + r.height - tolerance
    }
}

/// Maps a rectangle through an affine transform (corner hull).
pub fn transform_rect(m: &Matrix, rect: &Rect) -> BBox {
    let corners = [
        m.apply(rect.x, rect.y),
        m.apply(rect.x + rect.width, rect.y),
        m.apply(rect.x, rect.y + rect.height),
        m.apply(rect.x + rect.width, rect.y + rect.height),
    ];
    BBox::from_points(&corners)
}

/// Applies a text-space point through the full render transform; the C1
/// `compose` operation.
pub fn compose(render_matrix: &Matrix, x: f64, y: f64) -> (f64, f64) {
    render_matrix.apply(x, y)
}

/// A page's geometric identity: MediaBox extent, origin and rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// MediaBox origin
    pub origin_x: f64,
    pub origin_y: f64,
    /// MediaBox extent in points
    pub width: f64,
    pub height: f64,
    /// Normalized rotation: 0, 90, 180 or 270
    pub rotation: u16,
}

impl PageGeometry {
    pub fn new(
        origin_x: f64,
        origin_y: f64,
        width: f64,
        height: f64,
        rotation: i64,
    ) -> RedactResult<Self> {
        if !(origin_x.is_finite() && origin_y.is_finite() && width.is_finite() && height.is_finite())
        {
            return Err(RedactError::invalid_coordinate("non-finite page geometry"));
        }
        let normalized = rotation.rem_euclid(360);
        if normalized % 90 != 0 {
            return Err(RedactError::UnsupportedRotation { rotation });
        }
        Ok(PageGeometry {
            origin_x,
            origin_y,
            width,
            height,
            rotation: normalized as u16,
        })
    }

    /// Visual page size after rotation.
    pub fn visual_size(&self) -> (f64, f64) {
        match self.rotation {
            90 | 270 => (self.height, self.width),
            _ => (self.width, self.height),
        }
    }

    /// Transform from content-stream user space (bottom-left origin,
    /// pre-rotation) to device space (top-left origin, rotation applied).
    ///
    /// Rotation cases match the PDF.js viewport transform:
    /// 0 → (x, H-y), 90 → (y, x), 180 → (W-x, y), 270 → (H-y, W-x).
    pub fn base_matrix(&self) -> Matrix {
        let (x0, y0) = (self.origin_x, self.origin_y);
        let (w, h) = (self.width, self.height);
        match self.rotation {
            90 => Matrix([0.0, 1.0, 1.0, 0.0, -y0, -x0]),
            180 => Matrix([-1.0, 0.0, 0.0, 1.0, w + x0, -y0]),
            270 => Matrix([0.0, -1.0, -1.0, 0.0, h + y0, w + x0]),
            _ => Matrix([1.0, 0.0, 0.0, -1.0, -x0, h + y0]),
        }
    }

    /// Inverse of [`base_matrix`](Self::base_matrix): device space back to
    /// content-stream user space.
    pub fn inverse_base_matrix(&self) -> Matrix {
        // All four cases are involutions up to translation; the generic
        // inverse is exact here.
        self.base_matrix()
            .invert()
            .expect("rotation base matrix is always invertible")
    }
}

/// Converts an image-pixel rectangle to device space.
pub fn image_to_device(image: &ImageRect, page: &PageGeometry) -> RedactResult<DeviceRect> {
    image.rect.validated()?;
    if !image.dpi.is_finite() || image.dpi <= 0.0 {
        return Err(RedactError::invalid_coordinate(format!(
            "invalid DPI {}",
            image.dpi
        )));
    }
    let _ = page; // orientation is shared; only scale changes
    let scale = 72.0 / image.dpi;
    Ok(DeviceRect(Rect {
        x: image.rect.x * scale,
        y: image.rect.y * scale,
        width: image.rect.width * scale,
        height: image.rect.height * scale,
    }))
}

/// Converts a device-space rectangle back to image pixels at `dpi`.
pub fn device_to_image(
    device: &DeviceRect,
    dpi: f64,
    page: &PageGeometry,
) -> RedactResult<ImageRect> {
    device.0.validated()?;
    if !dpi.is_finite() || dpi <= 0.0 {
        return Err(RedactError::invalid_coordinate(format!(
            "invalid DPI {}",
            dpi
        )));
    }
    let _ = page;
    let scale = dpi / 72.0;
    Ok(ImageRect {
        rect: Rect {
            x: device.0.x * scale,
            y: device.0.y * scale,
            width: device.0.width * scale,
            height: device.0.height * scale,
        },
        dpi,
    })
}

/// Viewer user space shares origin, scale and orientation with device
/// space, so this conversion is the identity on coordinates.
pub fn user_to_device(user: &UserRect, page: &PageGeometry) -> RedactResult<DeviceRect> {
    user.0.validated()?;
    let _ = page;
    Ok(DeviceRect(user.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() <= eps
    }

    #[test]
    fn test_matrix_then_order() {
        // Translate then scale: the translation is scaled
        let m = Matrix::translation(10.0, 20.0).then(&Matrix::scale(2.0, 2.0));
        assert_eq!(m.apply(0.0, 0.0), (20.0, 40.0));
        // Scale then translate: it is not
        let m = Matrix::scale(2.0, 2.0).then(&Matrix::translation(10.0, 20.0));
        assert_eq!(m.apply(0.0, 0.0), (10.0, 20.0));
        assert_eq!(m.apply(1.0, 1.0), (12.0, 22.0));
    }

    #[test]
    fn test_matrix_invert() {
        let m = Matrix([2.0, 0.0, 0.0, 3.0, 5.0, 7.0]);
        let inv = m.invert().unwrap();
        let (x, y) = inv.apply(m.apply(1.5, -2.5).0, m.apply(1.5, -2.5).1);
        assert!(close(x, 1.5, 1e-12));
        assert!(close(y, -2.5, 1e-12));
        assert!(Matrix([0.0, 0.0, 0.0, 0.0, 1.0, 1.0]).invert().is_none());
    }

    #[test]
    fn test_base_matrix_rotations() {
        let page = |r| PageGeometry::new(0.0, 0.0, 612.0, 792.0, r).unwrap();

        // Rotation 0: bottom-left flips to top-left
        let m = page(0).base_matrix();
        assert_eq!(m.apply(0.0, 0.0), (0.0, 792.0));
        assert_eq!(m.apply(612.0, 792.0), (612.0, 0.0));

        // Rotation 90: (x, y) -> (y, x)
        let m = page(90).base_matrix();
        assert_eq!(m.apply(100.0, 30.0), (30.0, 100.0));

        // Rotation 180: (x, y) -> (W - x, y)
        let m = page(180).base_matrix();
        assert_eq!(m.apply(100.0, 30.0), (512.0, 30.0));

        // Rotation 270: (x, y) -> (H - y, W - x)
        let m = page(270).base_matrix();
        assert_eq!(m.apply(100.0, 30.0), (762.0, 512.0));
    }

    #[test]
    fn test_base_matrix_roundtrip() {
        for rotation in [0, 90, 180, 270] {
            let page = PageGeometry::new(5.0, 10.0, 612.0, 792.0, rotation).unwrap();
            let m = page.base_matrix();
            let inv = page.inverse_base_matrix();
            for &(x, y) in &[(5.0, 10.0), (200.0, 300.0), (617.0, 802.0)] {
                let (vx, vy) = m.apply(x, y);
                let (bx, by) = inv.apply(vx, vy);
                assert!(close(bx, x, 1e-9), "rotation {}", rotation);
                assert!(close(by, y, 1e-9), "rotation {}", rotation);
            }
        }
    }

    #[test]
    fn test_rotation_validation() {
        assert!(PageGeometry::new(0.0, 0.0, 100.0, 100.0, 45).is_err());
        assert_eq!(
            PageGeometry::new(0.0, 0.0, 100.0, 100.0, -90)
                .unwrap()
                .rotation,
            270
        );
        assert_eq!(
            PageGeometry::new(0.0, 0.0, 100.0, 100.0, 450)
                .unwrap()
                .rotation,
            90
        );
    }

    #[test]
    fn test_image_device_roundtrip_grid() {
        let page = PageGeometry::new(0.0, 0.0, 612.0, 792.0, 0).unwrap();
        for &dpi in &[36.0, 72.0, 96.0, 150.0, 200.0, 300.0, 600.0] {
            for &zoom in &[0.25, 0.5, 1.0, 1.5, 2.0, 4.0] {
                let rect = Rect::new(10.0 * zoom, 20.0 * zoom, 100.0 * zoom, 50.0 * zoom);
                let image = ImageRect { rect, dpi };
                let device = image_to_device(&image, &page).unwrap();
                let back = device_to_image(&device, dpi, &page).unwrap();
                assert!(close(back.rect.x, rect.x, 1e-4));
                assert!(close(back.rect.y, rect.y, 1e-4));
                assert!(close(back.rect.width, rect.width, 1e-4));
                assert!(close(back.rect.height, rect.height, 1e-4));
            }
        }
    }

    #[test]
    fn test_image_to_device_scaling() {
        let page = PageGeometry::new(0.0, 0.0, 612.0, 792.0, 0).unwrap();
        let image = ImageRect {
            rect: Rect::new(144.0, 288.0, 72.0, 36.0),
            dpi: 144.0,
        };
        let device = image_to_device(&image, &page).unwrap();
        assert_eq!(device.0, Rect::new(72.0, 144.0, 36.0, 18.0));
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let page = PageGeometry::new(0.0, 0.0, 612.0, 792.0, 0).unwrap();
        let bad_dpi = ImageRect {
            rect: Rect::new(0.0, 0.0, 10.0, 10.0),
            dpi: -72.0,
        };
        assert!(matches!(
            image_to_device(&bad_dpi, &page),
            Err(RedactError::InvalidCoordinate { .. })
        ));
        let bad_rect = ImageRect {
            rect: Rect::new(f64::NAN, 0.0, 10.0, 10.0),
            dpi: 72.0,
        };
        assert!(image_to_device(&bad_rect, &page).is_err());
        let negative = UserRect(Rect::new(0.0, 0.0, -1.0, 5.0));
        assert!(user_to_device(&negative, &page).is_err());
    }

    #[test]
    fn test_bbox_intersection_rules() {
        let bbox = BBox {
            x0: 10.0,
            y0: 10.0,
            x1: 30.0,
            y1: 20.0,
        };
        let rect = DeviceRect(Rect::new(20.0, 5.0, 20.0, 30.0));
        assert!(bbox.intersects(&rect));
        assert_eq!(bbox.intersection_area(&rect), 10.0 * 10.0);
        assert!(!bbox.intersects(&DeviceRect(Rect::new(100.0, 100.0, 5.0, 5.0))));
        assert!(rect.contains(25.0, 10.0));
        assert!(!rect.contains(19.9, 10.0));
    }

    #[test]
    fn test_transform_rect_under_rotation() {
        let page = PageGeometry::new(0.0, 0.0, 612.0, 792.0, 90).unwrap();
        let bbox = transform_rect(&page.base_matrix(), &Rect::new(100.0, 200.0, 50.0, 10.0));
        // (x, y) -> (y, x): x range from y, y range from x
        assert!(close(bbox.x0, 200.0, 1e-9));
        assert!(close(bbox.x1, 210.0, 1e-9));
        assert!(close(bbox.y0, 100.0, 1e-9));
        assert!(close(bbox.y1, 150.0, 1e-9));
    }
}
