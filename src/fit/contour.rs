use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};

/// Outermost borders traced on a binary edge map, as floating point pixel coordinates.
pub fn external_contours(edges: &GrayImage) -> Vec<Vec<[f64; 2]>> {
    find_contours::<i32>(edges)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| {
            c.points
                .into_iter()
                .map(|p| [p.x as f64, p.y as f64])
                .collect()
        })
        .collect()
}

/// Enclosed area of a closed polygon (shoelace formula).
pub fn polygon_area(points: &[[f64; 2]]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a[0] * b[1] - b[0] * a[1])
        .sum();
    twice.abs() / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;
    use imageproc::drawing::draw_hollow_rect_mut;
    use imageproc::rect::Rect;

    #[test]
    fn test_square_area() {
        let sq = [[0.0, 0.0], [4.0, 0.0], [4.0, 3.0], [0.0, 3.0]];
        assert_relative_eq!(polygon_area(&sq), 12.0);
        assert_relative_eq!(polygon_area(&sq[..2]), 0.0);
    }

    #[test]
    fn test_nested_outline_is_not_external() {
        let mut img = GrayImage::new(40, 40);
        draw_hollow_rect_mut(&mut img, Rect::at(2, 2).of_size(30, 30), Luma([255]));
        draw_hollow_rect_mut(&mut img, Rect::at(10, 10).of_size(8, 8), Luma([255]));

        let contours = external_contours(&img);
        assert_eq!(contours.len(), 1);
        let area = polygon_area(&contours[0]);
        assert!(area > 800.0, "outer outline area {area}");
    }
}
