use image::{GrayImage, Luma};
use plugpose::stereo::calibration::{CalibrationBundle, CalibrationDescription, Intrinsics};
use plugpose::stereo::{SgbmParams, StereoReconstructor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn test_fronto_parallel_texture_depth() -> anyhow::Result<()> {
    let bundle = CalibrationBundle::from_description(&CalibrationDescription {
        width: 128,
        height: 64,
        fov: 60.0,
        baseline: 0.1,
        intrinsics: Intrinsics {
            fx: 50.0,
            fy: 50.0,
            cx: 63.5,
            cy: 31.5,
        },
    })?;

    let shift = 8;
    let mut rng = StdRng::seed_from_u64(2024);
    let wide = GrayImage::from_fn(128 + shift, 64, |_, _| Luma([rng.gen_range(0..=255u8)]));
    let left = GrayImage::from_fn(128, 64, |x, y| *wide.get_pixel(x, y));
    let right = GrayImage::from_fn(128, 64, |x, y| *wide.get_pixel(x + shift, y));

    let params = SgbmParams {
        num_disparities: 16,
        ..SgbmParams::default()
    };
    let reconstructor = StereoReconstructor::new(&bundle, 128, 64, params)?;
    let result = reconstructor.reconstruct_depth(&left, &right)?;

    let mut depths: Vec<f32> = result.depth.iter().copied().filter(|z| z.is_finite()).collect();
    assert!(depths.len() > 128 * 64 / 2, "{} valid", depths.len());
    depths.sort_by(f32::total_cmp);
    let median = depths[depths.len() / 2];
    let expected = 50.0 * 0.1 / shift as f32;
    assert!((median - expected).abs() / expected < 0.05, "median {median}");

    // Invalid disparities have no 3D point.
    for (x, y, d) in result.disparity.enumerate_pixels() {
        if d[0] < 0.0 {
            assert!(result.points.get_pixel(x, y)[2].is_nan());
        }
    }
    Ok(())
}
