//! Test utilities for building ingest datagrams
//!
//! [`DatagramBuilder`] writes datagrams exactly the way the upstream decoder does (little-endian
//! floats, big-endian size fields) and can deliberately lie about the declared sizes so tests can
//! exercise every rejection path.

#![cfg(any(test, feature = "benchmark"))]

use crate::protocol::HEADER_SIZE;

/// Builder for raw ingest datagrams
#[derive(Debug, Clone, Default)]
pub struct DatagramBuilder {
    odom: [f32; 3],
    quat: [f32; 4],
    rc_goal: [f32; 3],
    point_cloud: Vec<u8>,
    frontier: Vec<u8>,
    declared_pc_size: Option<u32>,
    declared_fr_size: Option<u32>,
}

impl DatagramBuilder {
    /// Start from an all-zero header with no body
    pub fn new() -> Self {
        Self::default()
    }

    pub fn odom(mut self, odom: [f32; 3]) -> Self {
        self.odom = odom;
        self
    }

    pub fn quat(mut self, quat: [f32; 4]) -> Self {
        self.quat = quat;
        self
    }

    pub fn rc_goal(mut self, rc_goal: [f32; 3]) -> Self {
        self.rc_goal = rc_goal;
        self
    }

    /// Append one point to the cloud
    pub fn point(mut self, point: [f32; 3]) -> Self {
        for value in point {
            self.point_cloud.extend_from_slice(&value.to_le_bytes());
        }
        self
    }

    /// Append many points to the cloud
    pub fn points(self, points: impl IntoIterator<Item = [f32; 3]>) -> Self {
        points.into_iter().fold(self, |builder, point| builder.point(point))
    }

    /// Replace the point cloud with arbitrary bytes
    pub fn raw_point_cloud(mut self, bytes: &[u8]) -> Self {
        self.point_cloud = bytes.to_vec();
        self
    }

    pub fn frontier(mut self, frontier: &str) -> Self {
        self.frontier = frontier.as_bytes().to_vec();
        self
    }

    /// Replace the frontier with arbitrary, possibly invalid UTF-8, bytes
    pub fn raw_frontier(mut self, bytes: &[u8]) -> Self {
        self.frontier = bytes.to_vec();
        self
    }

    /// Override the pc_size header field instead of using the real body length
    pub fn declared_pc_size(mut self, size: u32) -> Self {
        self.declared_pc_size = Some(size);
        self
    }

    /// Override the fr_size header field instead of using the real body length
    pub fn declared_fr_size(mut self, size: u32) -> Self {
        self.declared_fr_size = Some(size);
        self
    }

    /// Serialize the datagram
    pub fn build(&self) -> Vec<u8> {
        let pc_size = self.declared_pc_size.unwrap_or(self.point_cloud.len() as u32);
        let fr_size = self.declared_fr_size.unwrap_or(self.frontier.len() as u32);

        let mut out =
            Vec::with_capacity(HEADER_SIZE + self.point_cloud.len() + self.frontier.len());
        for value in self.odom.iter().chain(self.quat.iter()).chain(self.rc_goal.iter()) {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&pc_size.to_be_bytes());
        out.extend_from_slice(&fr_size.to_be_bytes());
        out.extend_from_slice(&self.point_cloud);
        out.extend_from_slice(&self.frontier);
        out
    }
}

/// A datagram shaped like real traffic: a full lidar sweep plus a short frontier list
pub fn sample_datagram(points: usize) -> Vec<u8> {
    let cloud = (0..points).map(|i| {
        let angle = i as f32 * 0.01;
        [angle.cos() * 5.0, angle.sin() * 5.0, (i % 16) as f32 * 0.1]
    });

    DatagramBuilder::new()
        .odom([1.25, -3.5, 0.1])
        .quat([0.0, 0.0, 0.3826834, 0.9238795])
        .rc_goal([4.0, 2.0, 0.0])
        .points(cloud)
        .frontier("12.5,3.0;14.0,-2.5;9.75,8.0")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_header_with_real_sizes() {
        let datagram = DatagramBuilder::new().point([1.0, 2.0, 3.0]).frontier("ab").build();

        assert_eq!(datagram.len(), HEADER_SIZE + 12 + 2);
        assert_eq!(&datagram[40..44], &12u32.to_be_bytes());
        assert_eq!(&datagram[44..48], &2u32.to_be_bytes());
    }

    #[test]
    fn declared_sizes_override_body() {
        let datagram =
            DatagramBuilder::new().declared_pc_size(24).declared_fr_size(7).frontier("a").build();

        assert_eq!(&datagram[40..44], &24u32.to_be_bytes());
        assert_eq!(&datagram[44..48], &7u32.to_be_bytes());
        assert_eq!(datagram.len(), HEADER_SIZE + 1);
    }

    #[test]
    fn sample_fits_one_datagram() {
        let datagram = sample_datagram(4000);
        assert!(datagram.len() <= crate::protocol::MAX_DATAGRAM_SIZE);
    }
}
