use std::{path::Path, sync::Arc};

use image::RgbImage;
use tracing::info;

use crate::{error::Result, traits::ImagePreprocessor};

type Cdf = [f64; 256];

fn channel_cdfs(image: &RgbImage) -> [Cdf; 3] {
    let mut counts = [[0u64; 256]; 3];
    for p in image.pixels() {
        for c in 0..3 {
            counts[c][p.0[c] as usize] += 1;
        }
    }
    let total = (image.width() as u64 * image.height() as u64).max(1) as f64;
    counts.map(|channel| {
        let mut running = 0u64;
        channel.map(|n| {
            running += n;
            running as f64 / total
        })
    })
}

/// Cumulative channel histograms of a reference image. Built once and shared
/// read-only by every worker.
#[derive(Debug, Clone)]
pub struct HistogramReference {
    cdfs: [Cdf; 3],
}

impl HistogramReference {
    pub fn from_image(image: &RgbImage) -> Self {
        Self { cdfs: channel_cdfs(image) }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)?.to_rgb8();
        info!("Loaded histogram reference {:?} ({}x{})", path, image.width(), image.height());
        Ok(Self::from_image(&image))
    }
}

/// Remaps each channel so its histogram matches the reference image
#[derive(Debug, Clone)]
pub struct HistogramMatchPreprocessor {
    pub reference: Arc<HistogramReference>,
}

impl HistogramMatchPreprocessor {
    pub fn new(reference: Arc<HistogramReference>) -> Self {
        Self { reference }
    }

    fn lookup_tables(&self, image: &RgbImage) -> [[u8; 256]; 3] {
        let source = channel_cdfs(image);
        std::array::from_fn(|c| {
            let target = &self.reference.cdfs[c];
            std::array::from_fn(|v| {
                let level = source[c][v];
                target.iter().position(|&t| t >= level - 1e-12).unwrap_or(255) as u8
            })
        })
    }
}

impl ImagePreprocessor for HistogramMatchPreprocessor {
    fn preprocess(&self, image: &RgbImage) -> Result<RgbImage> {
        let tables = self.lookup_tables(image);
        let mut output = image.clone();
        for p in output.pixels_mut() {
            for c in 0..3 {
                p.0[c] = tables[c][p.0[c] as usize];
            }
        }
        Ok(output)
    }
}
