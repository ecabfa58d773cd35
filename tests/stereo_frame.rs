use approx::assert_relative_eq;
use image::{GrayImage, Luma};
use nalgebra as na;
use plugpose::camera::{project_point, CameraPose, Distortion};
use plugpose::config::PipelineConfig;
use plugpose::detection::{BoundingBox, DetectionBox};
use plugpose::model::ReferenceObjectModel;
use plugpose::pipeline::{SideInput, StereoPipeline};
use plugpose::stereo::calibration::{CalibrationBundle, CalibrationDescription, Intrinsics};
use plugpose::PinName;

const RADIUS: f64 = 8.0;

fn bundle() -> CalibrationBundle {
    CalibrationBundle::from_description(&CalibrationDescription {
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
    })
    .unwrap()
}

/// Object facing the camera: its +y axis points up in the image.
fn object_pose(x_offset: f64) -> CameraPose {
    CameraPose {
        rotation: na::Rotation3::from_axis_angle(&na::Vector3::x_axis(), std::f64::consts::PI)
            .into_inner(),
        translation: na::Vector3::new(x_offset, 0.0, 0.3),
    }
}

/// Filled discs with sub-pixel centers, bright on a dark background.
fn render(centers: &[na::Point2<f64>]) -> GrayImage {
    GrayImage::from_fn(1280, 720, |x, y| {
        let inside = centers.iter().any(|c| {
            let (dx, dy) = (x as f64 - c.x, y as f64 - c.y);
            dx * dx + dy * dy <= RADIUS * RADIUS
        });
        Luma([if inside { 220 } else { 40 }])
    })
}

fn detections(pixels: &[(PinName, na::Point2<f64>)]) -> Vec<DetectionBox> {
    let mut hub = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    let mut out = Vec::new();
    for (pin, p) in pixels {
        match pin {
            PinName::DcMinus | PinName::DcPlus => out.push(DetectionBox::new(
                BoundingBox::new(p.x - 12.0, p.y - 12.0, p.x + 12.0, p.y + 12.0),
                0.9,
                pin.class_id(),
            )),
            _ => {
                hub = (
                    hub.0.min(p.x - 12.0),
                    hub.1.min(p.y - 12.0),
                    hub.2.max(p.x + 12.0),
                    hub.3.max(p.y + 12.0),
                );
            }
        }
    }
    out.insert(0, DetectionBox::new(BoundingBox::new(hub.0, hub.1, hub.2, hub.3), 0.95, 0));
    out
}

fn side(
    model: &ReferenceObjectModel,
    pose: &CameraPose,
    bundle: &CalibrationBundle,
) -> Vec<(PinName, na::Point2<f64>)> {
    let k = bundle.left_intrinsics(1280, 720);
    model
        .points()
        .iter()
        .map(|(pin, p)| (*pin, project_point(p, pose, &k, &Distortion::default()).unwrap()))
        .collect()
}

#[test]
fn test_rendered_stereo_frame() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let model = ReferenceObjectModel::fallback();
    let bundle = bundle();

    // The right camera sits `baseline` to the right of the left one.
    let left_px = side(&model, &object_pose(0.0), &bundle);
    let right_px = side(&model, &object_pose(-0.1), &bundle);
    let left_img = render(&left_px.iter().map(|(_, p)| *p).collect::<Vec<_>>());
    let right_img = render(&right_px.iter().map(|(_, p)| *p).collect::<Vec<_>>());
    let (left_det, right_det) = (detections(&left_px), detections(&right_px));

    let pipeline = StereoPipeline::new(PipelineConfig::default(), bundle, model);
    let report = pipeline.process_frame(
        SideInput {
            image: &left_img,
            detections: &left_det,
        },
        SideInput {
            image: &right_img,
            detections: &right_det,
        },
    );

    assert_eq!(report.left.len(), 8);
    assert_eq!(report.right.len(), 8);
    for (pin, truth) in &left_px {
        let fitted = report.left.get(*pin).unwrap();
        assert!((fitted.cx - truth.x).abs() < 1.0, "{pin}: {} vs {}", fitted.cx, truth.x);
        assert!((fitted.cy - truth.y).abs() < 1.0, "{pin}: {} vs {}", fitted.cy, truth.y);
        assert_relative_eq!(fitted.major, 2.0 * RADIUS, max_relative = 0.15);
    }

    let left_pose = report.left_pose.expect("left pose");
    assert!(left_pose.reprojection_error_px < 1.0);
    assert_relative_eq!(left_pose.tvec[2], 0.3, max_relative = 0.02);
    assert!(left_pose.tvec[0].abs() < 0.002);
    let right_pose = report.right_pose.expect("right pose");
    assert_relative_eq!(right_pose.tvec[0], -0.1, epsilon = 0.003);

    assert_eq!(report.points.len(), 8);
    for p in &report.points {
        assert_relative_eq!(p.z, 0.3, max_relative = 0.01);
    }
    Ok(())
}
