//! Average shade: mean colour of an image.

use image::GenericImageView;
use serde::{Deserialize, Serialize};

use super::ProcessingUnit;
use crate::error::ProcessingError;
use crate::service::{ExecutionUnitTag, FieldDescription, FieldType, UnitManifest};
use crate::tasks::model::{FieldMap, TaskData};

pub const INPUT_FIELD: &str = "image";
pub const OUTPUT_FIELD: &str = "result";

/// Mean channel values, truncated towards zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shade {
    #[serde(rename = "Red")]
    pub red: u8,
    #[serde(rename = "Green")]
    pub green: u8,
    #[serde(rename = "Blue")]
    pub blue: u8,
}

/// Computes the average shade of a PNG or JPEG image.
#[derive(Debug, Default, Clone, Copy)]
pub struct AverageShade;

impl AverageShade {
    pub fn new() -> Self {
        Self
    }

    /// Decode an image and average every pixel. The format is sniffed from the
    /// bytes, not taken from the declared content type.
    pub fn shade_of(bytes: &[u8]) -> Result<Shade, ProcessingError> {
        if bytes.is_empty() {
            return Err(ProcessingError::EmptyInput {
                field: INPUT_FIELD.to_string(),
            });
        }

        let img = image::load_from_memory(bytes).map_err(|e| ProcessingError::Decode {
            field: INPUT_FIELD.to_string(),
            reason: e.to_string(),
        })?;

        let (width, height) = img.dimensions();
        let pixels = u64::from(width) * u64::from(height);
        if pixels == 0 {
            return Err(ProcessingError::EmptyInput {
                field: INPUT_FIELD.to_string(),
            });
        }

        let rgb = img.to_rgb8();
        let mut sums = [0u64; 3];
        for pixel in rgb.pixels() {
            for (sum, channel) in sums.iter_mut().zip(pixel.0) {
                *sum += u64::from(channel);
            }
        }

        // Each mean is at most 255.
        let mean = |sum: u64| (sum / pixels) as u8;
        Ok(Shade {
            red: mean(sums[0]),
            green: mean(sums[1]),
            blue: mean(sums[2]),
        })
    }
}

impl ProcessingUnit for AverageShade {
    fn manifest(&self) -> UnitManifest {
        UnitManifest {
            name: "Average Shade".to_string(),
            slug: "average-shade".to_string(),
            summary: "Returns the average shade of an image.".to_string(),
            description: "Returns the average shade of an image.".to_string(),
            data_in_fields: vec![FieldDescription::new(
                INPUT_FIELD,
                vec![FieldType::ImagePng, FieldType::ImageJpeg],
            )],
            data_out_fields: vec![FieldDescription::new(
                OUTPUT_FIELD,
                vec![FieldType::ApplicationJson],
            )],
            tags: vec![ExecutionUnitTag::image_processing()],
            docs_url: Some(
                "https://docs.swiss-ai-center.ch/reference/services/average-shade/".to_string(),
            ),
            has_ai: false,
        }
    }

    fn process(&self, inputs: &FieldMap) -> Result<FieldMap, ProcessingError> {
        let image = inputs
            .get(INPUT_FIELD)
            .ok_or_else(|| ProcessingError::MissingField(INPUT_FIELD.to_string()))?;

        let shade = Self::shade_of(&image.data)?;
        let body = serde_json::to_vec(&shade)?;

        let mut outputs = FieldMap::new();
        outputs.insert(
            OUTPUT_FIELD.to_string(),
            TaskData::new(body, FieldType::ApplicationJson),
        );
        Ok(outputs)
    }
}
