//! Deterministic hash and fractal noise primitives.
//!
//! Everything here is a pure function of its inputs: no seeds, no tables, no
//! shared state. Workers and the host thread can call these concurrently and
//! get bit-identical results.

/// Murmur3 32-bit mixing constants.
const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// Scale that maps the top 24 bits of a hash into `[0, 1)` exactly.
const UNIT_SCALE: f32 = 1.0 / 16_777_216.0;

#[inline]
fn mix_key(mut h: u32, key: u32) -> u32 {
    let mut k = key.wrapping_mul(C1);
    k = k.rotate_left(15);
    k = k.wrapping_mul(C2);
    h ^= k;
    h = h.rotate_left(13);
    h.wrapping_mul(5).wrapping_add(0xe654_6b64)
}

#[inline]
fn finalize(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Hash two lattice coordinates into a pseudo-random scalar in `[0, 1)`.
///
/// Murmur3-style multiply/rotate/xor cascade over both coordinates followed
/// by the Murmur3 finaliser. Only the top 24 bits are kept so the result is
/// exactly representable as `f32` and never rounds up to `1.0`.
#[inline]
pub fn hash(x: i32, z: i32) -> f32 {
    let mut h = mix_key(0, x as u32);
    h = mix_key(h, z as u32);
    h ^= 8;
    (finalize(h) >> 8) as f32 * UNIT_SCALE
}

/// Quintic fade `6t^5 - 15t^4 + 10t^3`; first and second derivatives vanish
/// at 0 and 1.
#[inline]
pub fn quintic(t: f64) -> f64 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

/// Linear interpolation from `a` to `b`.
#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Hermite smoothstep between `edge0` and `edge1`, clamped to `[0, 1]`.
#[inline]
pub fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[inline]
fn lattice(v: f64) -> i32 {
    // Wraps for coordinates beyond i32; the lattice just repeats.
    v.floor() as i64 as i32
}

/// 2D value noise in `[0, 1)`.
///
/// Bilinear blend of the four surrounding lattice hashes with quintic
/// smoothing, so the field is C2 continuous and safe to finite-difference.
pub fn noise(x: f64, z: f64) -> f64 {
    let x0 = x.floor();
    let z0 = z.floor();
    let xi = lattice(x0);
    let zi = lattice(z0);

    let u = quintic(x - x0);
    let v = quintic(z - z0);

    let a = f64::from(hash(xi, zi));
    let b = f64::from(hash(xi.wrapping_add(1), zi));
    let c = f64::from(hash(xi, zi.wrapping_add(1)));
    let d = f64::from(hash(xi.wrapping_add(1), zi.wrapping_add(1)));

    lerp(lerp(a, b, u), lerp(c, d, u), v)
}

/// Ridge transform of a `[0, 1)` noise sample: `(1 - |2n - 1|)^2`.
#[inline]
pub fn ridge(n: f64) -> f64 {
    let r = 1.0 - (2.0 * n - 1.0).abs();
    r * r
}

/// Ridged multifractal noise, normalised to `[0, 1]`.
///
/// Each octave's ridge value is multiplied by a weight derived from the
/// previous octave, so fine detail concentrates along the sharp ridge lines
/// of the coarser octaves.
pub fn ridged_fbm(x: f64, z: f64, octaves: u32) -> f64 {
    let mut sum = 0.0;
    let mut norm = 0.0;
    let mut amplitude = 0.5;
    let mut frequency = 1.0;
    let mut weight = 1.0;

    for _ in 0..octaves {
        let r = ridge(noise(x * frequency, z * frequency)) * weight;
        weight = (r * 2.0).clamp(0.0, 1.0);

        sum += r * amplitude;
        norm += amplitude;

        frequency *= 2.0;
        amplitude *= 0.5;
    }

    if norm > 0.0 { sum / norm } else { 0.0 }
}

const WARP_OCTAVES: u32 = 4;
const DETAIL_OCTAVES: u32 = 6;
const WARP_STRENGTH: f64 = 4.0;

/// Two-level domain-warped ridged noise in `[0, 1]`.
///
/// Level one offsets the input by two independent ridged fields, level two
/// offsets it again by two more ridged fields sampled at the warped point,
/// and the final ridged field is read at the doubly warped coordinates.
pub fn warp(x: f64, z: f64) -> f64 {
    let qx = ridged_fbm(x, z, WARP_OCTAVES);
    let qz = ridged_fbm(x + 5.2, z + 1.3, WARP_OCTAVES);

    let px = x + WARP_STRENGTH * qx;
    let pz = z + WARP_STRENGTH * qz;

    let rx = ridged_fbm(px + 1.7, pz + 9.2, WARP_OCTAVES);
    let rz = ridged_fbm(px + 8.3, pz + 2.8, WARP_OCTAVES);

    ridged_fbm(x + WARP_STRENGTH * rx, z + WARP_STRENGTH * rz, DETAIL_OCTAVES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic_and_in_unit_range() {
        for x in -200..200 {
            for z in -200..200 {
                let h = hash(x, z);
                assert_eq!(h, hash(x, z), "hash must be deterministic at ({x}, {z})");
                assert!((0.0..1.0).contains(&h), "hash {h} out of [0,1) at ({x}, {z})");
            }
        }
    }

    #[test]
    fn test_hash_extreme_coordinates_stay_in_range() {
        let corners = [
            (i32::MIN, i32::MIN),
            (i32::MAX, i32::MAX),
            (i32::MIN, i32::MAX),
            (0, i32::MIN),
        ];
        for (x, z) in corners {
            let h = hash(x, z);
            assert!((0.0..1.0).contains(&h), "hash {h} out of range at ({x}, {z})");
        }
    }

    #[test]
    fn test_hash_is_not_symmetric() {
        let differing = (0..64).filter(|&i| hash(i, i + 1) != hash(i + 1, i)).count();
        assert!(differing > 60, "swapping coordinates should change the hash");
    }

    #[test]
    fn test_hash_distribution_roughly_uniform() {
        let mut buckets = [0_u32; 10];
        for x in 0..100 {
            for z in 0..100 {
                let b = (hash(x, z) * 10.0) as usize;
                buckets[b] += 1;
            }
        }
        for (i, count) in buckets.iter().enumerate() {
            assert!(
                (700..1300).contains(count),
                "bucket {i} has {count} samples, expected about 1000"
            );
        }
    }

    #[test]
    fn test_noise_matches_hash_on_lattice() {
        for x in -5..5 {
            for z in -5..5 {
                let n = noise(f64::from(x), f64::from(z));
                assert_eq!(n, f64::from(hash(x, z)));
            }
        }
    }

    #[test]
    fn test_noise_is_continuous() {
        let eps = 1e-4;
        let delta = 1e-2;
        for i in 0..2_000 {
            let x = f64::from(i) * 0.173 - 150.0;
            let z = f64::from(i) * 0.091 + 20.0;
            let a = noise(x, z);
            let b = noise(x + eps, z);
            let c = noise(x, z + eps);
            assert!((a - b).abs() < delta, "x-discontinuity at ({x}, {z})");
            assert!((a - c).abs() < delta, "z-discontinuity at ({x}, {z})");
        }
    }

    #[test]
    fn test_noise_range() {
        for i in 0..5_000 {
            let x = f64::from(i) * 0.37 - 900.0;
            let z = f64::from(i) * 0.59 + 13.0;
            let n = noise(x, z);
            assert!((0.0..1.0).contains(&n), "noise {n} out of range at ({x}, {z})");
        }
    }

    #[test]
    fn test_quintic_endpoints() {
        assert_eq!(quintic(0.0), 0.0);
        assert_eq!(quintic(1.0), 1.0);
        assert!((quintic(0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_smoothstep_clamps() {
        assert_eq!(smoothstep(1.0, 2.0, 0.0), 0.0);
        assert_eq!(smoothstep(1.0, 2.0, 3.0), 1.0);
        assert!((smoothstep(0.0, 1.0, 0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ridge_peaks_at_half() {
        assert_eq!(ridge(0.5), 1.0);
        assert_eq!(ridge(0.0), 0.0);
    }

    #[test]
    fn test_ridged_fbm_in_unit_range() {
        for i in 0..1_000 {
            let x = f64::from(i) * 0.21;
            let z = f64::from(i) * -0.33;
            let v = ridged_fbm(x, z, 6);
            assert!((0.0..=1.0).contains(&v), "ridged_fbm {v} out of range");
        }
        assert_eq!(ridged_fbm(1.0, 2.0, 0), 0.0);
    }

    #[test]
    fn test_warp_is_deterministic_and_bounded() {
        for i in 0..200 {
            let x = f64::from(i) * 0.7 - 40.0;
            let z = f64::from(i) * 0.3 + 11.0;
            let a = warp(x, z);
            assert_eq!(a, warp(x, z));
            assert!((0.0..=1.0).contains(&a), "warp {a} out of range");
        }
    }

    #[test]
    fn test_warp_differs_from_unwarped_field() {
        let differing = (0..100)
            .map(|i| f64::from(i) * 0.45)
            .filter(|&x| (warp(x, 3.0) - ridged_fbm(x, 3.0, DETAIL_OCTAVES)).abs() > 1e-6)
            .count();
        assert!(differing > 50, "domain warp should move most samples");
    }
}
