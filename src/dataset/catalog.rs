//! Sample catalog loaded from a CSV table, and the validation/train split.
//!
//! The table's image column and label column are mapped onto `Sample`;
//! every other column rides along untouched as an extra field.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{LesionError, Result};

/// Scalar value of an auxiliary table column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Missing,
}

impl FieldValue {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            FieldValue::Missing
        } else if let Ok(n) = trimmed.parse::<f64>() {
            FieldValue::Number(n)
        } else {
            FieldValue::Text(trimmed.to_string())
        }
    }
}

/// One labeled (or unlabeled) image reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Full path to the image file
    pub image_path: PathBuf,
    /// Malignancy label; `None` only for unlabeled tables
    pub label: Option<u8>,
    /// Remaining columns, keyed by header name
    pub extra_fields: BTreeMap<String, FieldValue>,
}

/// Column names and file-name convention of an input table
#[derive(Debug, Clone)]
pub struct CatalogSchema {
    pub image_column: String,
    pub label_column: String,
    /// Appended to references that have no extension
    pub image_extension: String,
}

impl Default for CatalogSchema {
    fn default() -> Self {
        Self {
            image_column: "image_name".to_string(),
            label_column: "target".to_string(),
            image_extension: "jpg".to_string(),
        }
    }
}

/// Whether rows must carry a label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelPolicy {
    Required,
    Optional,
}

/// Ordered collection of samples
#[derive(Debug, Clone, Default)]
pub struct SampleCatalog {
    samples: Vec<Sample>,
}

impl SampleCatalog {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Read a headed CSV table.
    ///
    /// Image references are resolved against `image_dir`. With
    /// `LabelPolicy::Required` every row needs a `0` or `1` label.
    pub fn from_csv(
        csv_path: &Path,
        image_dir: &Path,
        schema: &CatalogSchema,
        policy: LabelPolicy,
    ) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(csv_path)?;

        let headers = reader.headers()?.clone();
        let image_idx = headers
            .iter()
            .position(|h| h == schema.image_column)
            .ok_or_else(|| {
                LesionError::Config(format!(
                    "column '{}' not found in {:?}",
                    schema.image_column, csv_path
                ))
            })?;
        let label_idx = headers.iter().position(|h| h == schema.label_column);
        if label_idx.is_none() && policy == LabelPolicy::Required {
            return Err(LesionError::Config(format!(
                "label column '{}' not found in {:?}",
                schema.label_column, csv_path
            )));
        }

        let mut samples = Vec::new();
        for record in reader.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            let reference = record.get(image_idx).unwrap_or("").trim();
            if reference.is_empty() {
                return Err(LesionError::MalformedRow {
                    line,
                    reason: format!("empty '{}'", schema.image_column),
                });
            }

            let label = match label_idx.map(|i| record.get(i).unwrap_or("").trim()) {
                Some(raw) if !raw.is_empty() => Some(parse_label(raw).ok_or_else(|| {
                    LesionError::MalformedRow {
                        line,
                        reason: format!("label '{}' is not 0 or 1", raw),
                    }
                })?),
                _ => None,
            };
            if label.is_none() && policy == LabelPolicy::Required {
                return Err(LesionError::MalformedRow {
                    line,
                    reason: format!("missing '{}'", schema.label_column),
                });
            }

            let extra_fields = headers
                .iter()
                .zip(record.iter())
                .enumerate()
                .filter(|(i, _)| *i != image_idx && Some(*i) != label_idx)
                .map(|(_, (h, v))| (h.to_string(), FieldValue::parse(v)))
                .collect();

            samples.push(Sample {
                image_path: resolve_image_path(image_dir, reference, &schema.image_extension),
                label,
                extra_fields,
            });
        }

        tracing::debug!("Loaded {} rows from {:?}", samples.len(), csv_path);
        Ok(Self { samples })
    }

    /// Split into `(train, validation)`.
    ///
    /// The first `floor(fraction * len)` rows become the validation
    /// partition; source order is kept and nothing is shuffled.
    pub fn split(&self, validation_fraction: f64) -> Result<(SampleCatalog, SampleCatalog)> {
        if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
            return Err(LesionError::Config(format!(
                "validation fraction must lie in (0, 1), got {}",
                validation_fraction
            )));
        }

        let k = (validation_fraction * self.samples.len() as f64).floor() as usize;
        let (validation, train) = self.samples.split_at(k);

        Ok((
            SampleCatalog::new(train.to_vec()),
            SampleCatalog::new(validation.to_vec()),
        ))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// `(positives, negatives)` among labeled samples
    pub fn label_counts(&self) -> (usize, usize) {
        self.samples
            .iter()
            .fold((0, 0), |(pos, neg), s| match s.label {
                Some(1) => (pos + 1, neg),
                Some(_) => (pos, neg + 1),
                None => (pos, neg),
            })
    }
}

fn parse_label(raw: &str) -> Option<u8> {
    match raw {
        "0" | "0.0" => Some(0),
        "1" | "1.0" => Some(1),
        _ => None,
    }
}

fn resolve_image_path(image_dir: &Path, reference: &str, extension: &str) -> PathBuf {
    let mut path = image_dir.join(reference);
    if path.extension().is_none() && !extension.is_empty() {
        path.set_extension(extension);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn catalog_of(n: usize) -> SampleCatalog {
        SampleCatalog::new(
            (0..n)
                .map(|i| Sample {
                    image_path: PathBuf::from(format!("ISIC_{:07}.jpg", i)),
                    label: Some((i % 2) as u8),
                    extra_fields: BTreeMap::new(),
                })
                .collect(),
        )
    }

    fn write_csv(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("train.csv");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_split_takes_leading_rows_for_validation() {
        let catalog = catalog_of(100);
        let (train, validation) = catalog.split(0.2).unwrap();

        assert_eq!(validation.len(), 20);
        assert_eq!(train.len(), 80);
        assert_eq!(validation.get(0), catalog.get(0));
        assert_eq!(validation.get(19), catalog.get(19));
        assert_eq!(train.get(0), catalog.get(20));
        assert_eq!(train.get(79), catalog.get(99));
    }

    #[test]
    fn test_split_floors_validation_size() {
        let (train, validation) = catalog_of(7).split(0.2).unwrap();
        assert_eq!(validation.len(), 1);
        assert_eq!(train.len(), 6);
    }

    #[test]
    fn test_split_rejects_out_of_range_fraction() {
        let catalog = catalog_of(10);
        for fraction in [0.0, 1.0, 2.0, f64::NAN] {
            assert!(catalog.split(fraction).unwrap_err().is_config());
        }
    }

    #[test]
    fn test_from_csv_passes_extra_fields_through() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(
            &dir,
            "image_name,patient_id,sex,age_approx,target\n\
             ISIC_0001,IP_1,male,45.0,0\n\
             ISIC_0002,IP_2,female,,1\n",
        );

        let catalog =
            SampleCatalog::from_csv(&csv, dir.path(), &CatalogSchema::default(), LabelPolicy::Required)
                .unwrap();

        assert_eq!(catalog.len(), 2);
        let first = catalog.get(0).unwrap();
        assert_eq!(first.image_path, dir.path().join("ISIC_0001.jpg"));
        assert_eq!(first.label, Some(0));
        assert_eq!(first.extra_fields["sex"], FieldValue::Text("male".to_string()));
        assert_eq!(first.extra_fields["age_approx"], FieldValue::Number(45.0));
        assert!(!first.extra_fields.contains_key("target"));

        let second = catalog.get(1).unwrap();
        assert_eq!(second.label, Some(1));
        assert_eq!(second.extra_fields["age_approx"], FieldValue::Missing);
        assert_eq!(catalog.label_counts(), (1, 1));
    }

    #[test]
    fn test_from_csv_rejects_bad_label() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(&dir, "image_name,target\nISIC_0001,0\nISIC_0002,2\n");

        let err =
            SampleCatalog::from_csv(&csv, dir.path(), &CatalogSchema::default(), LabelPolicy::Required)
                .unwrap_err();
        match err {
            LesionError::MalformedRow { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_csv_optional_labels() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(&dir, "image_name,patient_id\nISIC_0100,IP_9\n");

        let catalog =
            SampleCatalog::from_csv(&csv, dir.path(), &CatalogSchema::default(), LabelPolicy::Optional)
                .unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(0).unwrap().label, None);
        assert_eq!(catalog.label_counts(), (0, 0));

        let required =
            SampleCatalog::from_csv(&csv, dir.path(), &CatalogSchema::default(), LabelPolicy::Required);
        assert!(required.unwrap_err().is_config());
    }

    #[test]
    fn test_existing_extension_kept() {
        let path = resolve_image_path(Path::new("/imgs"), "a.png", "jpg");
        assert_eq!(path, PathBuf::from("/imgs/a.png"));
    }
}
