//! Semi-global block matching on rectified gray images.
//!
//! Matching cost is the block sum of absolute differences of the x-Sobel response clipped to
//! `pre_filter_cap`, plus a quarter of the raw intensity difference. Costs are aggregated along
//! five scanline directions (left, right, up, up-left, up-right) one image row at a time, so the
//! full cost volume is never held in memory.
use image::{GrayImage, ImageBuffer, Luma};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed-point disparity map with [`DISP_SCALE`] steps per pixel.
pub type FixedDisparity = ImageBuffer<Luma<i16>, Vec<i16>>;

pub const DISP_SHIFT: u32 = 4;
pub const DISP_SCALE: i32 = 1 << DISP_SHIFT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgbmParams {
    pub min_disparity: i32,
    /// Width of the disparity search range.
    pub num_disparities: i32,
    /// Odd side length of the matching block.
    pub block_size: u32,
    /// Penalty for a disparity change of one between neighbours.
    pub p1: u32,
    /// Penalty for larger disparity jumps.
    pub p2: u32,
    /// Percentage by which the best cost must beat every non-adjacent candidate.
    pub uniqueness_ratio: u32,
    /// Connected regions of at most this many pixels are discarded, 0 disables.
    pub speckle_window_size: u32,
    /// Largest disparity step, in pixels, inside one speckle region.
    pub speckle_range: i32,
    pub pre_filter_cap: i32,
    /// Largest allowed left-right disparity disagreement in pixels.
    pub disp12_max_diff: Option<i32>,
}

impl Default for SgbmParams {
    fn default() -> Self {
        let area = 5 * 5;
        Self {
            min_disparity: 0,
            num_disparities: 96,
            block_size: 5,
            p1: 8 * 3 * area,
            p2: 32 * 3 * area,
            uniqueness_ratio: 10,
            speckle_window_size: 50,
            speckle_range: 2,
            pre_filter_cap: 63,
            disp12_max_diff: None,
        }
    }
}

impl SgbmParams {
    /// Fixed-point value of pixels with no valid match.
    pub fn invalid_disparity(&self) -> i16 {
        ((self.min_disparity - 1) * DISP_SCALE) as i16
    }
}

#[derive(Debug, Clone)]
pub struct StereoSgbm {
    params: SgbmParams,
}

impl StereoSgbm {
    pub fn new(params: SgbmParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SgbmParams {
        &self.params
    }

    /// Disparity of every left pixel in 1/16 pixel units; the left pixel `x` matches the right
    /// pixel `x - d`.
    pub fn compute(&self, left: &GrayImage, right: &GrayImage) -> FixedDisparity {
        let (w, h) = left.dimensions();
        let p = &self.params;
        let invalid = p.invalid_disparity();
        let mut disp = FixedDisparity::from_pixel(w, h, Luma([invalid]));
        let nd = p.num_disparities.max(1) as usize;
        if w == 0 || h == 0 || right.dimensions() != (w, h) {
            return disp;
        }

        let costs = RowCosts::new(left, right, p, nd);
        let (w_us, radius) = (w as usize, (p.block_size.max(1) / 2) as i64);
        let first_valid = (p.min_disparity + p.num_disparities).max(0) as usize;

        // Previous-row aggregates of the three downward paths, and their per-pixel minima.
        let mut prev: [Vec<u32>; 3] = std::array::from_fn(|_| vec![0; w_us * nd]);
        let mut prev_min: [Vec<u32>; 3] = std::array::from_fn(|_| vec![0; w_us]);
        let mut cur: [Vec<u32>; 3] = std::array::from_fn(|_| vec![0; w_us * nd]);
        let mut cur_min: [Vec<u32>; 3] = std::array::from_fn(|_| vec![0; w_us]);
        let mut horizontal = vec![0u32; w_us * nd];
        let mut sum = vec![0u32; w_us * nd];
        let mut cache = BTreeMap::new();

        for y in 0..h as i64 {
            let cost = costs.block_row(y, radius, &mut cache);
            sum.fill(0);

            // Downward paths: up-left, up, up-right.
            for (path, dx) in [-1i64, 0, 1].into_iter().enumerate() {
                for x in 0..w_us {
                    let px = x as i64 + dx;
                    let pred = (y > 0 && px >= 0 && px < w_us as i64).then(|| {
                        let px = px as usize;
                        (&prev[path][px * nd..(px + 1) * nd], prev_min[path][px])
                    });
                    let out = &mut cur[path][x * nd..(x + 1) * nd];
                    cur_min[path][x] = aggregate(&cost[x * nd..(x + 1) * nd], pred, p.p1, p.p2, out);
                }
            }
            for path in 0..3 {
                for (s, c) in sum.iter_mut().zip(&cur[path]) {
                    *s += c;
                }
            }

            // Horizontal paths: left to right, then right to left.
            let mut carried = vec![0u32; nd];
            for reverse in [false, true] {
                let mut last_min = None;
                for i in 0..w_us {
                    let x = if reverse { w_us - 1 - i } else { i };
                    let out = &mut horizontal[x * nd..(x + 1) * nd];
                    let pred = last_min.map(|m| (carried.as_slice(), m));
                    let m = aggregate(&cost[x * nd..(x + 1) * nd], pred, p.p1, p.p2, out);
                    carried.copy_from_slice(out);
                    last_min = Some(m);
                }
                for (s, c) in sum.iter_mut().zip(&horizontal) {
                    *s += c;
                }
            }

            let row = select_row(&sum, w_us, nd, first_valid, p);
            for (x, d) in row.into_iter().enumerate() {
                disp.put_pixel(x as u32, y as u32, Luma([d]));
            }

            std::mem::swap(&mut prev, &mut cur);
            std::mem::swap(&mut prev_min, &mut cur_min);
        }

        if p.speckle_window_size > 0 {
            filter_speckles(
                &mut disp,
                invalid,
                p.speckle_window_size as usize,
                p.speckle_range * DISP_SCALE,
            );
        }
        disp
    }
}

/// One step along a path: `L(p, d) = C(p, d) + min(L(q, d), L(q, d±1) + P1, min L(q) + P2) - min L(q)`.
fn aggregate(cost: &[u32], pred: Option<(&[u32], u32)>, p1: u32, p2: u32, out: &mut [u32]) -> u32 {
    let Some((prev, prev_min)) = pred else {
        out.copy_from_slice(cost);
        return cost.iter().copied().min().unwrap_or(0);
    };
    let nd = cost.len();
    let jump = prev_min + p2;
    let mut best = u32::MAX;
    for d in 0..nd {
        let mut m = prev[d].min(jump);
        if d > 0 {
            m = m.min(prev[d - 1] + p1);
        }
        if d + 1 < nd {
            m = m.min(prev[d + 1] + p1);
        }
        out[d] = cost[d] + m - prev_min;
        best = best.min(out[d]);
    }
    best
}

/// Winner-take-all with uniqueness test, parabolic sub-pixel refinement and the optional
/// left-right consistency check.
fn select_row(sum: &[u32], w: usize, nd: usize, first_valid: usize, p: &SgbmParams) -> Vec<i16> {
    let invalid = p.invalid_disparity();
    let mut row = vec![invalid; w];
    let mut right_cost = vec![u32::MAX; w];
    let mut right_disp = vec![-1i32; w];

    for x in first_valid.min(w)..w {
        let s = &sum[x * nd..(x + 1) * nd];
        let Some((best, &min_s)) = s.iter().enumerate().min_by_key(|(_, v)| **v) else {
            continue;
        };

        let d_abs = best as i32 + p.min_disparity;
        let xr = x as i64 - d_abs as i64;
        if (0..w as i64).contains(&xr) && min_s < right_cost[xr as usize] {
            right_cost[xr as usize] = min_s;
            right_disp[xr as usize] = d_abs;
        }

        let ambiguous = s.iter().enumerate().any(|(d, &v)| {
            (d as i64 - best as i64).abs() > 1
                && (v as u64) * ((100 - p.uniqueness_ratio.min(100)) as u64) < (min_s as u64) * 100
        });
        if ambiguous {
            continue;
        }

        let mut d16 = d_abs * DISP_SCALE;
        if best > 0 && best + 1 < nd {
            let (lo, hi) = (s[best - 1] as i64, s[best + 1] as i64);
            let denom = (lo + hi - 2 * min_s as i64).max(1);
            d16 += (((lo - hi) * DISP_SCALE as i64 + denom) / (2 * denom)) as i32;
        }
        row[x] = d16 as i16;
    }

    if let Some(max_diff) = p.disp12_max_diff {
        for x in 0..w {
            let d16 = row[x] as i32;
            if d16 == invalid as i32 {
                continue;
            }
            let lo = d16 >> DISP_SHIFT;
            let hi = (d16 + DISP_SCALE - 1) >> DISP_SHIFT;
            let xr = x as i64 - hi as i64;
            if xr >= 0 && (xr as usize) < w {
                let dr = right_disp[xr as usize];
                if dr >= p.min_disparity && (dr - lo).abs() > max_diff && (dr - hi).abs() > max_diff {
                    row[x] = invalid;
                }
            }
        }
    }
    row
}

/// Per-pixel matching costs, box-filtered rows cached while they are within reach.
struct RowCosts {
    left_sobel: Vec<i32>,
    right_sobel: Vec<i32>,
    left_raw: Vec<i32>,
    right_raw: Vec<i32>,
    width: usize,
    height: usize,
    nd: usize,
    min_d: i32,
    max_cost: u32,
}

impl RowCosts {
    fn new(left: &GrayImage, right: &GrayImage, p: &SgbmParams, nd: usize) -> Self {
        let cap = p.pre_filter_cap.max(1);
        let prefilter = |img: &GrayImage| -> Vec<i32> {
            imageproc::gradients::horizontal_sobel(img)
                .pixels()
                .map(|g| (g[0] as i32).clamp(-cap, cap) + cap)
                .collect()
        };
        let raw = |img: &GrayImage| -> Vec<i32> { img.pixels().map(|g| g[0] as i32).collect() };
        let (w, h) = left.dimensions();
        Self {
            left_sobel: prefilter(left),
            right_sobel: prefilter(right),
            left_raw: raw(left),
            right_raw: raw(right),
            width: w as usize,
            height: h as usize,
            nd,
            min_d: p.min_disparity,
            max_cost: (2 * cap + 255 / 4) as u32,
        }
    }

    /// Pixel costs of one row, box-summed horizontally.
    fn horizontal_row(&self, y: usize, radius: i64) -> Vec<u32> {
        let (w, nd) = (self.width, self.nd);
        let base = y * w;
        let mut pixel = vec![0u32; w * nd];
        pixel.par_chunks_mut(nd).enumerate().for_each(|(x, c)| {
            for (di, out) in c.iter_mut().enumerate() {
                let xr = x as i64 - (di as i32 + self.min_d) as i64;
                *out = if xr < 0 || xr >= w as i64 {
                    self.max_cost
                } else {
                    let (l, r) = (base + x, base + xr as usize);
                    let ds = (self.left_sobel[l] - self.right_sobel[r]).unsigned_abs();
                    let dr = (self.left_raw[l] - self.right_raw[r]).unsigned_abs();
                    ds + dr / 4
                };
            }
        });

        let mut boxed = vec![0u32; w * nd];
        boxed.par_chunks_mut(nd).enumerate().for_each(|(x, out)| {
            for dx in -radius..=radius {
                let xs = (x as i64 + dx).clamp(0, w as i64 - 1) as usize;
                for (o, v) in out.iter_mut().zip(&pixel[xs * nd..(xs + 1) * nd]) {
                    *o += v;
                }
            }
        });
        boxed
    }

    /// Block costs of row `y`; rows above the window are evicted from `cache`.
    fn block_row(&self, y: i64, radius: i64, cache: &mut BTreeMap<usize, Vec<u32>>) -> Vec<u32> {
        let last = self.height as i64 - 1;
        let rows: Vec<usize> = (y - radius..=y + radius)
            .map(|yy| yy.clamp(0, last) as usize)
            .collect();
        let lowest = rows.iter().copied().min().unwrap_or(0);
        cache.retain(|k, _| *k >= lowest);

        let mut total = vec![0u32; self.width * self.nd];
        for yy in rows {
            let row = cache.entry(yy).or_insert_with(|| self.horizontal_row(yy, radius));
            for (t, v) in total.iter_mut().zip(row.iter()) {
                *t += v;
            }
        }
        total
    }
}

/// Replaces small connected regions of similar disparity with `new_val`.
pub fn filter_speckles(disp: &mut FixedDisparity, new_val: i16, max_size: usize, max_diff: i32) {
    let (w, h) = disp.dimensions();
    let (w, h) = (w as usize, h as usize);
    let mut label = vec![0u32; w * h];
    let mut region_small: Vec<bool> = vec![false];
    let mut queue = Vec::new();
    let data: Vec<i16> = disp.pixels().map(|p| p[0]).collect();

    for start in 0..w * h {
        if data[start] == new_val || label[start] != 0 {
            continue;
        }
        let id = region_small.len() as u32;
        label[start] = id;
        queue.clear();
        queue.push(start);
        let mut size = 0usize;
        while let Some(i) = queue.pop() {
            size += 1;
            let (x, y) = (i % w, i / w);
            let neighbours = [
                (x > 0).then(|| i - 1),
                (x + 1 < w).then(|| i + 1),
                (y > 0).then(|| i - w),
                (y + 1 < h).then(|| i + w),
            ];
            for j in neighbours.into_iter().flatten() {
                if label[j] == 0
                    && data[j] != new_val
                    && (data[j] as i32 - data[i] as i32).abs() <= max_diff
                {
                    label[j] = id;
                    queue.push(j);
                }
            }
        }
        region_small.push(size <= max_size);
    }

    for (i, p) in disp.pixels_mut().enumerate() {
        if region_small[label[i] as usize] && label[i] != 0 {
            p.0[0] = new_val;
        }
    }
}

/// Fixed-point disparity to pixels. Invalid entries become `min_disparity - 1`.
pub fn to_float(disp: &FixedDisparity) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let (w, h) = disp.dimensions();
    ImageBuffer::from_fn(w, h, |x, y| {
        Luma([disp.get_pixel(x, y)[0] as f32 / DISP_SCALE as f32])
    })
}
