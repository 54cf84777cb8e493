use nalgebra::{Matrix3, Vector3};

/// Below this determinant a tile's covariance is treated as singular
const SINGULAR_DETERMINANT: f64 = 1e-9;

/// Mean and inverse covariance of three-channel samples
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    pub mean: Vector3<f64>,
    pub covariance: Matrix3<f64>,
    pub inverse: Matrix3<f64>,
}

impl ChannelStats {
    /// `None` when there are too few samples or the covariance is singular,
    /// e.g. a uniform tile
    pub fn estimate(samples: impl Iterator<Item = [f64; 3]> + Clone) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = Vector3::zeros();
        for s in samples.clone() {
            sum += Vector3::from(s);
            count += 1;
        }
        if count < 4 {
            return None;
        }
        let mean = sum / count as f64;

        let mut covariance = Matrix3::zeros();
        for s in samples {
            let d = Vector3::from(s) - mean;
            covariance += d * d.transpose();
        }
        covariance /= (count - 1) as f64;

        if covariance.determinant().abs() < SINGULAR_DETERMINANT {
            return None;
        }
        let inverse = covariance.try_inverse()?;
        Some(Self { mean, covariance, inverse })
    }

    /// Squared Mahalanobis distance from the mean
    pub fn mahalanobis_sq(&self, sample: [f64; 3]) -> f64 {
        let d = Vector3::from(sample) - self.mean;
        (d.transpose() * self.inverse * d)[(0, 0)]
    }
}

pub fn rgb_sample(rgb: &image::Rgb<u8>) -> [f64; 3] {
    [rgb.0[0] as f64, rgb.0[1] as f64, rgb.0[2] as f64]
}
