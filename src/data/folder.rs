use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::data::augment::AugmentationPolicy;
use crate::data::batch::{batches_in_order, BatchSource, LabeledBatch};
use crate::data::preprocess::Preprocessing;
use crate::error::{Error, Result};
use crate::model::labels::ClassLabelSpace;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// Decoded images larger than this multiple of the target size are shrunk
/// once at load time. Augmentation crops at most 20% away, so detail beyond
/// this is never seen by the model.
const RAW_SIZE_FACTOR: u32 = 4;

/// A labeled image directory: one sub-directory per class.
///
/// ```text
/// root/
///   ai/    img001.png ...
///   real/  img002.jpg ...
/// ```
///
/// Classes are the sub-directory names in sorted order, so label `i` is the
/// `i`-th name alphabetically.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    classes: ClassLabelSpace,
    samples: Vec<(PathBuf, usize)>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        entries.push(entry?.path());
    }
    entries.sort();
    Ok(entries)
}

impl ImageFolder {
    pub fn open(root: &Path) -> Result<ImageFolder> {
        if !root.is_dir() {
            return Err(Error::InvalidInput(format!("{} is not a directory", root.display())));
        }

        let class_dirs: Vec<PathBuf> = sorted_entries(root)?
            .into_iter()
            .filter(|p| p.is_dir())
            .filter(|p| !p.file_name().map_or(true, |n| n.to_string_lossy().starts_with('.')))
            .collect();
        if class_dirs.is_empty() {
            return Err(Error::InvalidInput(format!("{} has no class directories", root.display())));
        }

        let names: Vec<String> = class_dirs.iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        let classes = ClassLabelSpace::new(names)?;

        let mut samples = Vec::new();
        for (label, dir) in class_dirs.iter().enumerate() {
            for path in sorted_entries(dir)? {
                if path.is_file() && is_image(&path) {
                    samples.push((path, label));
                } else {
                    warn!(path = %path.display(), "skipping non-image entry");
                }
            }
        }
        debug!(root = %root.display(), classes = ?classes.names(), samples = samples.len(), "opened image folder");

        Ok(ImageFolder { root: root.to_path_buf(), classes, samples })
    }

    /// Opens a folder that must use exactly the classes of `expected`.
    pub fn open_with_classes(root: &Path, expected: &ClassLabelSpace) -> Result<ImageFolder> {
        let folder = ImageFolder::open(root)?;
        expected.ensure_same(&folder.classes, &format!("{}", root.display()))?;
        Ok(folder)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes(&self) -> &ClassLabelSpace {
        &self.classes
    }

    /// Number of images per class, in label order.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for (_, label) in &self.samples {
            counts[*label] += 1;
        }
        counts
    }

    pub fn samples(&self) -> &[(PathBuf, usize)] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Decodes every image and turns the folder into a batch source.
    ///
    /// With `shuffle_seed` set the split reshuffles each epoch, otherwise
    /// batches keep the folder's sorted order.
    pub fn into_split(
        self,
        preprocessing: Preprocessing,
        augmentation: AugmentationPolicy,
        batch_size: usize,
        shuffle_seed: Option<u64>,
    ) -> Result<ImageSplit> {
        preprocessing.validate()?;
        if batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be positive".into()));
        }

        let (paths, labels): (Vec<PathBuf>, Vec<usize>) = self.samples.into_iter().unzip();
        let max_w = preprocessing.width.saturating_mul(RAW_SIZE_FACTOR);
        let max_h = preprocessing.height.saturating_mul(RAW_SIZE_FACTOR);

        let mut decoded = Vec::with_capacity(paths.len());
        for path in &paths {
            let img = image::open(path)
                .map_err(|e| Error::Image(format!("{}: {}", path.display(), e)))?;
            decoded.push(img);
        }

        let samples = if augmentation.is_none() {
            Samples::Prepared(decoded.iter().map(|img| preprocessing.apply(img)).collect())
        } else {
            Samples::Raw(decoded.into_iter().map(|img| {
                if img.width() > max_w || img.height() > max_h {
                    img.resize(max_w, max_h, FilterType::Triangle)
                } else {
                    img
                }
            }).collect())
        };

        Ok(ImageSplit {
            paths,
            labels,
            samples,
            preprocessing,
            augmentation,
            batch_size,
            shuffle: shuffle_seed.is_some(),
            rng: StdRng::seed_from_u64(shuffle_seed.unwrap_or(0)),
        })
    }
}

enum Samples {
    /// Preprocessed once; used when no augmentation is applied.
    Prepared(Vec<Vec<f64>>),
    /// Decoded images, augmented and preprocessed on every pass.
    Raw(Vec<DynamicImage>),
}

/// Batch source over a decoded image folder.
pub struct ImageSplit {
    paths: Vec<PathBuf>,
    labels: Vec<usize>,
    samples: Samples,
    preprocessing: Preprocessing,
    augmentation: AugmentationPolicy,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl ImageSplit {
    /// Source file of each example, in unshuffled order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }
}

impl BatchSource for ImageSplit {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn epoch(&mut self) -> Box<dyn Iterator<Item = LabeledBatch> + '_> {
        let mut order: Vec<usize> = (0..self.labels.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }

        let labels = &self.labels;
        match &self.samples {
            Samples::Prepared(inputs) => {
                batches_in_order(order, self.batch_size, move |i| (inputs[i].clone(), labels[i]))
            }
            Samples::Raw(images) => {
                let rng = &mut self.rng;
                let augmentation = self.augmentation;
                let preprocessing = &self.preprocessing;
                batches_in_order(order, self.batch_size, move |i| {
                    let augmented = augmentation.apply(&images[i], &mut *rng);
                    (preprocessing.apply(&augmented), labels[i])
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(path: &Path, shade: u8) {
        RgbImage::from_pixel(6, 6, Rgb([shade, shade, shade])).save(path).unwrap();
    }

    fn folder() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("real")).unwrap();
        fs::create_dir(dir.path().join("ai")).unwrap();
        write_png(&dir.path().join("ai/a.png"), 10);
        write_png(&dir.path().join("real/b.png"), 200);
        write_png(&dir.path().join("real/c.png"), 220);
        fs::write(dir.path().join("real/notes.txt"), "skip me").unwrap();
        dir
    }

    #[test]
    fn classes_are_sorted_directory_names() {
        let dir = folder();
        let f = ImageFolder::open(dir.path()).unwrap();
        assert_eq!(f.classes().names(), ["ai".to_string(), "real".to_string()]);
        assert_eq!(f.class_counts(), vec![1, 2]);
        assert_eq!(f.len(), 3);
    }

    #[test]
    fn split_yields_preprocessed_batches() {
        let dir = folder();
        let pre = Preprocessing { width: 2, height: 2, ..Preprocessing::default() };
        let mut split = ImageFolder::open(dir.path()).unwrap()
            .into_split(pre.clone(), AugmentationPolicy::None, 2, None)
            .unwrap();
        let batches: Vec<LabeledBatch> = split.epoch().collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].labels(), &[0, 1]);
        assert_eq!(batches[0].inputs()[0].len(), pre.input_len());
    }

    #[test]
    fn augmented_split_keeps_input_width() {
        let dir = folder();
        let pre = Preprocessing { width: 3, height: 3, ..Preprocessing::default() };
        let mut split = ImageFolder::open(dir.path()).unwrap()
            .into_split(pre.clone(), AugmentationPolicy::Strong, 8, Some(3))
            .unwrap();
        let batch = split.epoch().next().unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.inputs().iter().all(|x| x.len() == pre.input_len()));
    }

    #[test]
    fn mismatched_validation_classes_are_rejected() {
        let dir = folder();
        let expected = ClassLabelSpace::new(["fake", "real"]).unwrap();
        assert!(matches!(
            ImageFolder::open_with_classes(dir.path(), &expected),
            Err(Error::InvalidInput(_))
        ));
    }
}
