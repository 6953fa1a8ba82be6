//! Wavefront OBJ export for raw captures.
//!
//! OBJ is a plain-text mesh format every 3D tool can open:
//! ```text
//! o wall_0          # One named object per captured element
//! v x y z           # 8 box corners
//! f a b c d         # 6 outward-facing quads, 1-based global indices
//! ```

use std::io::{self, Write};

use crate::capture::{CapturedElement, RawCapture};

/// File extension of exported models
pub const MODEL_EXTENSION: &str = "obj";

/// Box faces as corner indices, counter-clockwise seen from outside
const BOX_FACES: [[usize; 4]; 6] = [
    [0, 1, 2, 3], // bottom
    [4, 7, 6, 5], // top
    [0, 4, 5, 1], // -z
    [3, 2, 6, 7], // +z
    [0, 3, 7, 4], // -x
    [1, 5, 6, 2], // +x
];

/// Serialize a capture to OBJ bytes.
///
/// Fails when the capture has nothing to export or carries non-finite values.
pub fn to_obj(capture: &RawCapture) -> Result<Vec<u8>, String> {
    capture.validate()?;

    let mut out = Vec::with_capacity(capture.elements.len() * 400);
    write_obj(capture, &mut out).map_err(|e| format!("Failed to serialize model: {}", e))?;
    Ok(out)
}

/// Stream a capture as OBJ text into `out`.
pub fn write_obj(capture: &RawCapture, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "# room-scanner export")?;
    writeln!(out, "# captured {}", capture.captured_at.to_rfc3339())?;
    writeln!(out, "# {} elements", capture.elements.len())?;

    for (i, element) in capture.elements.iter().enumerate() {
        writeln!(out, "o {}", object_name(element, i))?;
        for [x, y, z] in element.corners() {
            writeln!(out, "v {:.4} {:.4} {:.4}", x, y, z)?;
        }
        let base = i * 8 + 1;
        for face in BOX_FACES {
            writeln!(
                out,
                "f {} {} {} {}",
                base + face[0],
                base + face[1],
                base + face[2],
                base + face[3]
            )?;
        }
    }

    Ok(())
}

/// `wall_0`, `object_3_sofa`: OBJ names may not contain whitespace
fn object_name(element: &CapturedElement, index: usize) -> String {
    let mut name = format!("{}_{}", element.kind.as_str(), index);
    if let Some(label) = element.label.as_deref() {
        let label: String = label
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        if !label.is_empty() {
            name.push('_');
            name.push_str(&label);
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ElementKind;

    fn lines_starting<'a>(text: &'a str, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        text.lines().filter(move |l| l.starts_with(prefix))
    }

    #[test]
    fn test_obj_has_box_per_element() {
        let room = RawCapture::rectangular_room(4.0, 3.0, 2.5);
        let text = String::from_utf8(to_obj(&room).unwrap()).unwrap();

        assert_eq!(lines_starting(&text, "o ").count(), 5);
        assert_eq!(lines_starting(&text, "v ").count(), 40);
        assert_eq!(lines_starting(&text, "f ").count(), 30);
        assert!(text.contains("o floor_0"));
        assert!(text.contains("o wall_4"));
    }

    #[test]
    fn test_face_indices_stay_in_range() {
        let room = RawCapture::rectangular_room(2.0, 2.0, 2.0);
        let text = String::from_utf8(to_obj(&room).unwrap()).unwrap();
        let vertex_count = lines_starting(&text, "v ").count();

        for face in lines_starting(&text, "f ") {
            for index in face.split_whitespace().skip(1) {
                let index: usize = index.parse().unwrap();
                assert!(index >= 1 && index <= vertex_count, "{}", face);
            }
        }
    }

    #[test]
    fn test_labels_are_sanitized() {
        let mut sofa =
            CapturedElement::new(ElementKind::Object, [2.0, 0.8, 0.9], [0.0, 0.4, 0.0], 0.0);
        sofa.label = Some("corner sofa".to_string());
        let text = String::from_utf8(to_obj(&RawCapture::new(vec![sofa])).unwrap()).unwrap();
        assert!(text.contains("o object_0_corner_sofa"));
    }

    #[test]
    fn test_empty_capture_is_an_error() {
        let err = to_obj(&RawCapture::new(vec![])).unwrap_err();
        assert!(err.contains("no geometry"));
    }
}
