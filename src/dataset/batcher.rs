//! Burn batching for lesion images
//!
//! `BatchSource` walks a `SampleCatalog` in (optionally shuffled) order and
//! hands out fixed-size batches. Images are decoded and augmented lazily,
//! one batch at a time, in parallel on the rayon pool.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::augmentation::AugmentationPipeline;
use super::catalog::SampleCatalog;
use crate::utils::error::{LesionError, Result};

/// A single preprocessed sample
#[derive(Clone, Debug)]
pub struct LesionItem {
    /// Image data as flattened CHW float array [3 * H * W]
    pub image: Vec<f32>,
    /// Malignancy label (0 or 1)
    pub label: u8,
    /// Position of the sample in its catalog
    pub index: usize,
}

/// A batch of lesion images
#[derive(Clone, Debug)]
pub struct LesionBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
    /// Labels on the host, for metric accumulation
    pub labels: Vec<u8>,
    /// Catalog positions of the samples in this batch
    pub indices: Vec<usize>,
}

impl<B: Backend> LesionBatch<B> {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Stacks preprocessed items into tensors on one device
#[derive(Clone, Debug)]
pub struct LesionBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> LesionBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

impl<B: Backend> Batcher<LesionItem, LesionBatch<B>> for LesionBatcher<B> {
    fn batch(&self, items: Vec<LesionItem>) -> LesionBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let labels: Vec<u8> = items.iter().map(|item| item.label).collect();
        let indices: Vec<usize> = items.iter().map(|item| item.index).collect();
        let images_data: Vec<f32> = items.into_iter().flat_map(|item| item.image).collect();

        // Pipeline output is already normalized
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            &self.device,
        );

        let targets_data: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets_data, [batch_size]),
            &self.device,
        );

        LesionBatch {
            images,
            targets,
            labels,
            indices,
        }
    }
}

/// Number of batches needed to cover `len` samples
pub fn num_batches(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        len.div_ceil(batch_size)
    }
}

/// Epoch-by-epoch batch producer over one catalog partition
pub struct BatchSource {
    catalog: SampleCatalog,
    pipeline: AugmentationPipeline,
    batch_size: usize,
    shuffle: bool,
    rng: ChaCha8Rng,
}

impl BatchSource {
    /// Every sample in `catalog` must be labeled.
    pub fn new(
        catalog: SampleCatalog,
        pipeline: AugmentationPipeline,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(LesionError::Config("batch size must be positive".to_string()));
        }
        if let Some(pos) = catalog.iter().position(|s| s.label.is_none()) {
            return Err(LesionError::Config(format!(
                "sample #{} has no label and cannot be batched for training",
                pos
            )));
        }

        Ok(Self {
            catalog,
            pipeline,
            batch_size,
            shuffle,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        num_batches(self.catalog.len(), self.batch_size)
    }

    /// Start a new traversal.
    ///
    /// With shuffling on, each call draws a fresh order. Every sample also
    /// gets its own augmentation seed, so results do not depend on how rayon
    /// schedules the decode work.
    pub fn iterate<B: Backend>(&mut self, device: &B::Device) -> BatchIter<'_, B> {
        let mut order: Vec<usize> = (0..self.catalog.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        let work: Vec<(usize, u64)> = order.into_iter().map(|i| (i, self.rng.gen())).collect();

        BatchIter {
            catalog: &self.catalog,
            pipeline: &self.pipeline,
            batcher: LesionBatcher::new(device.clone(), self.pipeline.crop_size() as usize),
            batch_size: self.batch_size,
            work,
            cursor: 0,
        }
    }
}

/// Lazy sequence of batches for one traversal
pub struct BatchIter<'a, B: Backend> {
    catalog: &'a SampleCatalog,
    pipeline: &'a AugmentationPipeline,
    batcher: LesionBatcher<B>,
    batch_size: usize,
    work: Vec<(usize, u64)>,
    cursor: usize,
}

impl<B: Backend> BatchIter<'_, B> {
    fn load_item(&self, index: usize, seed: u64) -> Result<LesionItem> {
        let sample = self.catalog.get(index).ok_or_else(|| {
            LesionError::Training(format!("sample index {} out of range", index))
        })?;

        let img = image::open(&sample.image_path).map_err(|e| LesionError::ImageLoad {
            path: sample.image_path.clone(),
            index,
            reason: e.to_string(),
        })?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Ok(LesionItem {
            image: self.pipeline.apply(&img, &mut rng),
            label: sample.label.unwrap_or(0),
            index,
        })
    }
}

impl<B: Backend> Iterator for BatchIter<'_, B> {
    type Item = Result<LesionBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.work.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.work.len());
        let chunk = &self.work[self.cursor..end];
        self.cursor = end;

        let items = chunk
            .par_iter()
            .map(|&(index, seed)| self.load_item(index, seed))
            .collect::<Result<Vec<_>>>();

        Some(items.map(|items| self.batcher.batch(items)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = num_batches(self.work.len() - self.cursor, self.batch_size);
        (remaining, Some(remaining))
    }
}
