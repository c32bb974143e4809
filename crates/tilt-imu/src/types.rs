use glam::DVec3;

/// Three-component vector used for every sensor quantity.
///
/// Arithmetic goes through named methods only; there is no operator
/// overloading and no scalar/vector coercion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3(DVec3);

impl Vector3 {
    pub const ZERO: Self = Self(DVec3::ZERO);
    /// Unit vector along +X, the gravity direction of a sensor at rest.
    pub const X: Self = Self(DVec3::X);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self(DVec3::new(x, y, z))
    }

    pub fn x(self) -> f64 {
        self.0.x
    }

    pub fn y(self) -> f64 {
        self.0.y
    }

    pub fn z(self) -> f64 {
        self.0.z
    }

    /// Copy of `self` with the X component replaced.
    pub fn with_x(self, x: f64) -> Self {
        Self(DVec3::new(x, self.0.y, self.0.z))
    }

    pub fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }

    pub fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }

    pub fn scale(self, k: f64) -> Self {
        Self(self.0 * k)
    }

    pub fn divide(self, k: f64) -> Self {
        Self(self.0 / k)
    }

    pub fn length(self) -> f64 {
        self.0.length()
    }

    pub fn to_array(self) -> [f64; 3] {
        self.0.to_array()
    }
}

impl From<[f64; 3]> for Vector3 {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// One decoded sensor reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    /// Device clock in milliseconds. Wraps at `u32::MAX`.
    pub timestamp_ms: u32,
    /// Linear acceleration (g).
    pub accel: Vector3,
    /// Angular velocity (deg/s).
    pub gyro: Vector3,
}

/// Per-sample output of the orientation estimator.
///
/// Orientation fields are in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationRecord {
    /// Sum of inter-sample deltas since the first fused sample.
    pub elapsed_time_ms: f64,
    pub accel: Vector3,
    pub gyro: Vector3,
    /// Complementary filter output.
    pub fused_orientation: Vector3,
    /// Raw gyro integral. Drifts without bound.
    pub integrated_gyro_orientation: Vector3,
    /// Tilt from filtered gravity, with X substituted by the gyro prediction.
    pub gravity_tilt_orientation: Vector3,
    /// Integral of the low-passed gyro.
    pub low_pass_gyro_orientation: Vector3,
    pub low_pass_accel: Vector3,
    pub low_pass_gyro: Vector3,
}

impl OrientationRecord {
    /// The vector fields in export column order.
    pub fn vectors(&self) -> [Vector3; 8] {
        [
            self.accel,
            self.gyro,
            self.fused_orientation,
            self.integrated_gyro_orientation,
            self.gravity_tilt_orientation,
            self.low_pass_gyro_orientation,
            self.low_pass_accel,
            self.low_pass_gyro,
        ]
    }
}
