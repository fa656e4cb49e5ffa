//! Decoded frame type for the relay pipeline

/// One point of the cloud, in the producer's coordinate frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    /// Create a point from its coordinates
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Coordinates in x, y, z order
    pub fn coords(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f32; 3]> for Point {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

/// A single validated telemetry frame
///
/// Built by [`parse_frame`](crate::protocol::parse_frame) from one datagram, handed to the
/// encoder and dropped once encoded. Nothing holds on to frames.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedFrame {
    /// Odometry position
    pub odom: [f32; 3],

    /// Orientation quaternion
    pub quat: [f32; 4],

    /// Remote-control goal position
    pub rc_goal: [f32; 3],

    /// Point cloud in source order
    pub points: Vec<Point>,

    /// Frontier text; malformed UTF-8 from the producer has been replaced
    pub frontier: String,
}

impl DecodedFrame {
    /// Number of points in the cloud
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Length of the frontier text in UTF-8 bytes
    pub fn frontier_byte_len(&self) -> usize {
        self.frontier.len()
    }

    /// Header values in wire order: odom, quat, rc_goal
    pub fn header_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.odom.iter().chain(self.quat.iter()).chain(self.rc_goal.iter()).copied()
    }
}
