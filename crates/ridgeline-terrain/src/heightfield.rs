//! Row-major elevation grid shared by the chunk pipeline and erosion.

/// A `width × depth` grid of `f32` elevations stored row-major (`z` rows of
/// `x` samples).
#[derive(Clone, Debug, PartialEq)]
pub struct Heightfield {
    width: usize,
    depth: usize,
    heights: Vec<f32>,
}

impl Heightfield {
    /// Create a flat grid at elevation zero.
    pub fn new(width: usize, depth: usize) -> Self {
        Self::filled(width, depth, 0.0)
    }

    /// Create a grid with every node at `height`.
    pub fn filled(width: usize, depth: usize, height: f32) -> Self {
        Self {
            width,
            depth,
            heights: vec![height; width * depth],
        }
    }

    /// Wrap an existing buffer. Returns `None` if the length does not match.
    pub fn from_vec(width: usize, depth: usize, heights: Vec<f32>) -> Option<Self> {
        (heights.len() == width * depth).then_some(Self {
            width,
            depth,
            heights,
        })
    }

    /// Number of nodes along x.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of nodes along z.
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    fn index(&self, x: usize, z: usize) -> usize {
        z * self.width + x
    }

    /// Height at node `(x, z)`.
    #[inline]
    pub fn get(&self, x: usize, z: usize) -> f32 {
        self.heights[self.index(x, z)]
    }

    /// Overwrite node `(x, z)`.
    #[inline]
    pub fn set(&mut self, x: usize, z: usize, height: f32) {
        let i = self.index(x, z);
        self.heights[i] = height;
    }

    /// Add `delta` to node `(x, z)`.
    #[inline]
    pub fn add(&mut self, x: usize, z: usize, delta: f32) {
        let i = self.index(x, z);
        self.heights[i] += delta;
    }

    /// Raw row-major samples.
    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    /// Give up the grid and return its buffer without copying.
    pub fn into_vec(self) -> Vec<f32> {
        self.heights
    }

    /// Sum of all samples, accumulated in `f64`.
    pub fn total_mass(&self) -> f64 {
        self.heights.iter().map(|&h| f64::from(h)).sum()
    }

    /// Bilinear height and gradient at continuous grid position `(x, z)`.
    ///
    /// The position must satisfy `0 <= x < width - 1` and `0 <= z < depth - 1`.
    /// Returns `(height, dh/dx, dh/dz)` in grid units.
    pub fn height_and_gradient(&self, x: f32, z: f32) -> (f32, f32, f32) {
        let cx = x as usize;
        let cz = z as usize;
        let u = x - cx as f32;
        let v = z - cz as f32;

        let nw = self.get(cx, cz);
        let ne = self.get(cx + 1, cz);
        let sw = self.get(cx, cz + 1);
        let se = self.get(cx + 1, cz + 1);

        let grad_x = (ne - nw) * (1.0 - v) + (se - sw) * v;
        let grad_z = (sw - nw) * (1.0 - u) + (se - ne) * u;
        let height = nw * (1.0 - u) * (1.0 - v) + ne * u * (1.0 - v) + sw * (1.0 - u) * v + se * u * v;

        (height, grad_x, grad_z)
    }
}
