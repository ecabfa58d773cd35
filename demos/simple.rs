use nalgebra as na;
use plugpose::camera::{project_point, CameraIntrinsics, CameraPose, Distortion};
use plugpose::geom::ellipse::{Parametric, PlanarEllipse};
use plugpose::model::ReferenceObjectModel;
use plugpose::pnp::{solve_pnp, PnpConfig};

fn main() -> Result<(), plugpose::Error> {
    // Fit an ellipse to points sampled from a known one
    let truth = PlanarEllipse::from_parameters(12.0, 7.0, 0.4, 320.0, 240.0);
    let boundary: Vec<[f64; 2]> = truth.sample_boundary(40).iter().map(|p| [p.x, p.y]).collect();
    let fitted = PlanarEllipse::<Parametric<f64>>::fit_points(&boundary)?;
    println!("fitted: {:?}", fitted);

    // Project the built-in pin layout and recover the pose
    let intrinsics = CameraIntrinsics {
        fx: 1350.0,
        fy: 1350.0,
        cx: 640.0,
        cy: 360.0,
        width: 1280,
        height: 720,
    };
    let pose = CameraPose {
        rotation: na::Rotation3::from_euler_angles(std::f64::consts::PI + 0.1, 0.05, 0.2).into_inner(),
        translation: na::Vector3::new(0.0, 0.01, 0.3),
    };
    let model = ReferenceObjectModel::fallback();
    let object: Vec<_> = model.points().values().copied().collect();
    let image = object
        .iter()
        .map(|p| project_point(p, &pose, &intrinsics, &Distortion::default()))
        .collect::<Result<Vec<_>, _>>()?;

    let solved = solve_pnp(&object, &image, &intrinsics, &Distortion::default(), &PnpConfig::default())?;
    let report = solved.report();
    println!("tvec: {:?}", report.tvec);
    println!(
        "roll/pitch/yaw: {:.2} {:.2} {:.2} deg",
        report.roll_deg, report.pitch_deg, report.yaw_deg
    );
    println!("reprojection error: {:.2e}px", report.reprojection_error_px);

    Ok(())
}
