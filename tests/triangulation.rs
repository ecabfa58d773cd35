use approx::assert_relative_eq;
use plugpose::detection::PixelBox;
use plugpose::fiducial::{NamedFiducialSet, PinName, Side};
use plugpose::fit::EllipseResult;
use plugpose::stereo::calibration::{CalibrationBundle, CalibrationDescription, Intrinsics};
use plugpose::stereo::triangulate_named;

fn fiducial(pin: PinName, cx: f64, cy: f64) -> EllipseResult {
    EllipseResult {
        cls: pin.class_id(),
        confidence: 0.9,
        bbox: PixelBox::from([0, 0, 1, 1]),
        cx,
        cy,
        major: 12.0,
        minor: 10.0,
        angle_deg: 0.0,
        residual: 0.0,
    }
}

#[test]
fn test_shifted_detections_give_expected_depth() -> anyhow::Result<()> {
    let bundle = CalibrationBundle::from_description(&CalibrationDescription {
        width: 1280,
        height: 720,
        fov: 30.0,
        baseline: 0.1,
        intrinsics: Intrinsics {
            fx: 1350.0,
            fy: 1350.0,
            cx: 640.0,
            cy: 360.0,
        },
    })?;

    let mut left = NamedFiducialSet::new(Side::Left);
    let mut right = NamedFiducialSet::new(Side::Right);
    for (i, pin) in PinName::ALL.into_iter().enumerate() {
        let (x, y) = (500.0 + 30.0 * i as f64, 300.0 + 11.0 * i as f64);
        left.points.insert(pin, fiducial(pin, x, y));
        right.points.insert(pin, fiducial(pin, x - 20.0, y));
    }
    // One pin with an impossible negative disparity.
    right.points.insert(PinName::PE, fiducial(PinName::PE, 900.0, 344.0));

    let points = triangulate_named(&left, &right, &bundle.q);
    assert_eq!(points.len(), 7);
    assert!(points.iter().all(|p| p.pin != Some(PinName::PE)));
    for p in &points {
        assert_relative_eq!(p.z, 1350.0 * 0.1 / 20.0, max_relative = 0.01);
    }
    Ok(())
}
