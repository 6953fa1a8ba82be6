//! Raw capture geometry.
//!
//! A finished scan arrives as a list of categorized, oriented boxes in a
//! y-up right-handed frame, metres throughout. This is the only shape the
//! export stage relies on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a captured element is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Wall,
    Floor,
    Door,
    Window,
    Opening,
    Object,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Wall => "wall",
            ElementKind::Floor => "floor",
            ElementKind::Door => "door",
            ElementKind::Window => "window",
            ElementKind::Opening => "opening",
            ElementKind::Object => "object",
        }
    }
}

/// One reconstructed surface or object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedElement {
    pub kind: ElementKind,
    /// Optional finer label, e.g. "sofa" for an object
    #[serde(default)]
    pub label: Option<String>,
    /// Extent along local x (width), y (height), z (depth)
    pub dimensions: [f32; 3],
    /// Centre in world space
    pub position: [f32; 3],
    /// Rotation about the vertical axis, radians
    #[serde(default)]
    pub yaw: f32,
}

impl CapturedElement {
    pub fn new(kind: ElementKind, dimensions: [f32; 3], position: [f32; 3], yaw: f32) -> Self {
        Self {
            kind,
            label: None,
            dimensions,
            position,
            yaw,
        }
    }

    /// The 8 box corners in world space.
    ///
    /// Order: bottom face (y-) counter-clockwise seen from above, then top face.
    pub fn corners(&self) -> [[f32; 3]; 8] {
        let [hx, hy, hz] = self.dimensions.map(|d| d.abs() / 2.0);
        let (sin, cos) = self.yaw.sin_cos();
        let [px, py, pz] = self.position;

        let local = [
            [-hx, -hy, -hz],
            [hx, -hy, -hz],
            [hx, -hy, hz],
            [-hx, -hy, hz],
            [-hx, hy, -hz],
            [hx, hy, -hz],
            [hx, hy, hz],
            [-hx, hy, hz],
        ];

        local.map(|[x, y, z]| [px + x * cos - z * sin, py + y, pz + x * sin + z * cos])
    }

    fn is_finite(&self) -> bool {
        self.dimensions
            .iter()
            .chain(self.position.iter())
            .chain(std::iter::once(&self.yaw))
            .all(|v| v.is_finite())
    }
}

/// The in-memory result of a finished scanning session, prior to export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCapture {
    pub elements: Vec<CapturedElement>,
    pub captured_at: DateTime<Utc>,
}

impl RawCapture {
    pub fn new(elements: Vec<CapturedElement>) -> Self {
        Self {
            elements,
            captured_at: Utc::now(),
        }
    }

    /// Four walls and a floor enclosing a `width` × `length` × `height` box
    /// centred on the origin at floor level.
    pub fn rectangular_room(width: f32, length: f32, height: f32) -> Self {
        const THICKNESS: f32 = 0.1;
        let (hw, hl, hh) = (width / 2.0, length / 2.0, height / 2.0);

        Self::new(vec![
            CapturedElement::new(ElementKind::Floor, [width, 0.0, length], [0.0, 0.0, 0.0], 0.0),
            CapturedElement::new(ElementKind::Wall, [width, height, THICKNESS], [0.0, hh, -hl], 0.0),
            CapturedElement::new(ElementKind::Wall, [width, height, THICKNESS], [0.0, hh, hl], 0.0),
            CapturedElement::new(
                ElementKind::Wall,
                [length, height, THICKNESS],
                [-hw, hh, 0.0],
                std::f32::consts::FRAC_PI_2,
            ),
            CapturedElement::new(
                ElementKind::Wall,
                [length, height, THICKNESS],
                [hw, hh, 0.0],
                std::f32::consts::FRAC_PI_2,
            ),
        ])
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Reject geometry the exporter cannot write (NaN or infinite values).
    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("capture contains no geometry".to_string());
        }
        match self.elements.iter().position(|e| !e.is_finite()) {
            Some(i) => Err(format!("element {} has non-finite geometry", i)),
            None => Ok(()),
        }
    }

    /// Axis-aligned world bounds (min, max) over every element corner
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let mut corners = self.elements.iter().flat_map(|e| e.corners());
        let first = corners.next()?;
        let (mut min, mut max) = (first, first);
        for c in corners {
            for axis in 0..3 {
                min[axis] = min[axis].min(c[axis]);
                max[axis] = max[axis].max(c[axis]);
            }
        }
        Some((min, max))
    }

    /// Human-readable footprint and height, e.g. "4.0 × 3.0 × 2.5 m"
    pub fn room_size(&self) -> Option<String> {
        let (min, max) = self.bounds()?;
        let [w, h, l] = [max[0] - min[0], max[1] - min[1], max[2] - min[2]];
        if !(w.is_finite() && h.is_finite() && l.is_finite()) || w <= 0.0 || l <= 0.0 {
            return None;
        }
        Some(format!("{:.1} × {:.1} × {:.1} m", w, l, h))
    }
}
