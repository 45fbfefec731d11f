//! Model module for lesion classifier backbones using the Burn framework
//!
//! This module provides:
//! - ResNet-18 and EfficientNet-B4 backbones
//! - `LesionClassifier`, the backbone-agnostic wrapper used by training
//! - The freeze policy applied after pretrained weights are loaded
//!
//! Every backbone ends in a linear head of `num_outputs` units; only
//! column 0 carries the malignancy logit.

pub mod efficientnet;
pub mod resnet;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::{
    config::Config,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::utils::error::{LesionError, Result as LesionResult};

pub use efficientnet::EfficientNetB4;
pub use resnet::ResNet18;

/// Supported backbones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum BackboneKind {
    #[serde(rename = "resnet", alias = "resnet18")]
    #[value(name = "resnet", alias = "resnet18")]
    ResNet,
    #[serde(rename = "efficientnet", alias = "efficientnet-b4")]
    #[value(name = "efficientnet", alias = "efficientnet-b4")]
    EfficientNet,
}

impl fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackboneKind::ResNet => write!(f, "resnet"),
            BackboneKind::EfficientNet => write!(f, "efficientnet"),
        }
    }
}

impl FromStr for BackboneKind {
    type Err = LesionError;

    fn from_str(s: &str) -> LesionResult<Self> {
        match s.to_lowercase().as_str() {
            "resnet" | "resnet18" => Ok(BackboneKind::ResNet),
            "efficientnet" | "efficientnet-b4" => Ok(BackboneKind::EfficientNet),
            other => Err(LesionError::Config(format!(
                "unsupported model type '{}' (expected resnet or efficientnet)",
                other
            ))),
        }
    }
}

/// Configuration for assembling a `LesionClassifier`
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Backbone architecture
    pub backbone: BackboneKind,

    /// Width of the final linear layer
    #[config(default = "9")]
    pub num_outputs: usize,

    /// Channel width multiplier
    #[config(default = "1.0")]
    pub width_scale: f64,

    /// Dropout before the EfficientNet head
    #[config(default = "0.4")]
    pub dropout: f64,

    /// Burn record holding pretrained weights for the whole network
    pub pretrained_weights: Option<PathBuf>,
}

/// Scale a channel count, keeping at least 4 channels
pub(crate) fn scaled_channels(channels: usize, width_scale: f64) -> usize {
    ((channels as f64 * width_scale).round() as usize).max(4)
}

/// Recorder for checkpoints and pretrained weights; keeps every float at f32
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Backbone plus task head
#[derive(Module, Debug)]
pub enum LesionClassifier<B: Backend> {
    ResNet(ResNet18<B>),
    EfficientNet(EfficientNetB4<B>),
}

impl<B: Backend> LesionClassifier<B> {
    /// Build the network, load pretrained weights if configured, then
    /// freeze the pretrained prefix.
    pub fn assemble(config: &ModelConfig, device: &B::Device) -> LesionResult<Self> {
        if config.num_outputs == 0 {
            return Err(LesionError::Config(
                "classification head needs at least one output".to_string(),
            ));
        }
        if !(config.width_scale.is_finite() && config.width_scale > 0.0) {
            return Err(LesionError::Config(format!(
                "width scale must be positive, got {}",
                config.width_scale
            )));
        }

        let mut model = match config.backbone {
            BackboneKind::ResNet => {
                LesionClassifier::ResNet(ResNet18::new(config.num_outputs, config.width_scale, device))
            }
            BackboneKind::EfficientNet => LesionClassifier::EfficientNet(EfficientNetB4::new(
                config.num_outputs,
                config.width_scale,
                config.dropout,
                device,
            )),
        };

        match &config.pretrained_weights {
            Some(path) => {
                model = model.load_checkpoint(path, device)?;
                tracing::info!("Loaded pretrained weights from {:?}", path);
            }
            None => {
                tracing::warn!(
                    "No pretrained weights configured - {} starts from random initialization",
                    config.backbone
                );
            }
        }

        let model = model.freeze_pretrained_prefix();
        tracing::info!(
            "Assembled {} ({} parameters), frozen: {}",
            config.backbone,
            model.num_params(),
            model.frozen_groups().join(", ")
        );

        Ok(model)
    }

    /// Write the full model state to `path` (`.mpk` is appended)
    pub fn save_checkpoint(&self, path: &Path) -> LesionResult<()> {
        self.clone()
            .save_file(path.to_path_buf(), &CheckpointRecorder::new())
            .map_err(|e| LesionError::Model(format!("failed to save model to {:?}: {:?}", path, e)))
    }

    /// Replace the model state with the record at `path`
    pub fn load_checkpoint(self, path: &Path, device: &B::Device) -> LesionResult<Self> {
        self.load_file(path.to_path_buf(), &CheckpointRecorder::new(), device)
            .map_err(|e| {
                LesionError::Model(format!("failed to load model from {:?}: {}", path, e))
            })
    }

    pub fn backbone(&self) -> BackboneKind {
        match self {
            LesionClassifier::ResNet(_) => BackboneKind::ResNet,
            LesionClassifier::EfficientNet(_) => BackboneKind::EfficientNet,
        }
    }

    /// Raw head output, shape `[batch, num_outputs]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            LesionClassifier::ResNet(model) => model.forward(images),
            LesionClassifier::EfficientNet(model) => model.forward(images),
        }
    }

    /// Malignancy logits (head column 0), shape `[batch]`
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 1> {
        let output = self.forward(images);
        let [batch, _] = output.dims();
        output.slice([0..batch, 0..1]).reshape([batch])
    }

    /// Mark the pretrained prefix of the backbone as non-trainable
    pub fn freeze_pretrained_prefix(self) -> Self {
        match self {
            LesionClassifier::ResNet(model) => {
                LesionClassifier::ResNet(model.freeze_pretrained_prefix())
            }
            LesionClassifier::EfficientNet(model) => {
                LesionClassifier::EfficientNet(model.freeze_pretrained_prefix())
            }
        }
    }

    /// Names of the frozen parameter groups
    pub fn frozen_groups(&self) -> Vec<String> {
        match self {
            LesionClassifier::ResNet(_) => ResNet18::<B>::frozen_groups(),
            LesionClassifier::EfficientNet(_) => EfficientNetB4::<B>::frozen_groups(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};
    use burn::tensor::Distribution;

    type TrainBackend = Autodiff<NdArray>;

    fn tiny_config(backbone: BackboneKind) -> ModelConfig {
        ModelConfig::new(backbone).with_width_scale(0.125)
    }

    fn weights<const D: usize>(t: Tensor<TrainBackend, D>) -> Vec<f32> {
        t.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    fn one_step(model: LesionClassifier<TrainBackend>) -> LesionClassifier<TrainBackend> {
        let device = Default::default();
        let mut optim = AdamConfig::new().init::<TrainBackend, LesionClassifier<TrainBackend>>();

        let input =
            Tensor::<TrainBackend, 4>::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);
        let loss = model.forward(input).powf_scalar(2.0).mean();
        let grads = GradientsParams::from_grads(loss.backward(), &model);

        optim.step(0.1, model, grads)
    }

    #[test]
    fn test_backbone_parsing() {
        assert_eq!("resnet".parse::<BackboneKind>().unwrap(), BackboneKind::ResNet);
        assert_eq!(
            "EfficientNet-B4".parse::<BackboneKind>().unwrap(),
            BackboneKind::EfficientNet
        );
        assert!("vgg16".parse::<BackboneKind>().unwrap_err().is_config());
    }

    #[test]
    fn test_default_head_width() {
        let config = ModelConfig::new(BackboneKind::ResNet);
        assert_eq!(config.num_outputs, 9);
        assert!(config.pretrained_weights.is_none());
    }

    #[test]
    fn test_logit_column_shape() {
        let device = Default::default();
        let model =
            LesionClassifier::<NdArray>::assemble(&tiny_config(BackboneKind::ResNet), &device)
                .unwrap();

        let input = Tensor::<NdArray, 4>::zeros([3, 3, 32, 32], &device);
        assert_eq!(model.forward(input.clone()).dims(), [3, 9]);
        assert_eq!(model.forward_logits(input).dims(), [3]);
    }

    #[test]
    fn test_zero_outputs_rejected() {
        let device = Default::default();
        let config = tiny_config(BackboneKind::ResNet).with_num_outputs(0);
        let result = LesionClassifier::<NdArray>::assemble(&config, &device);
        assert!(result.err().map(|e| e.is_config()).unwrap_or(false));
    }

    #[test]
    fn test_missing_pretrained_record_is_model_error() {
        let device = Default::default();
        let config = tiny_config(BackboneKind::ResNet)
            .with_pretrained_weights(Some(PathBuf::from("/nonexistent/resnet18")));
        let result = LesionClassifier::<NdArray>::assemble(&config, &device);
        assert!(matches!(result, Err(LesionError::Model(_))));
    }

    #[test]
    fn test_checkpoint_round_trip_is_exact() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("best_model");
        let device = Default::default();
        let config = tiny_config(BackboneKind::ResNet);

        let model = LesionClassifier::<NdArray>::assemble(&config, &device).unwrap();
        model.save_checkpoint(&path).unwrap();
        assert!(dir.path().join("best_model.mpk").exists());

        let fresh = LesionClassifier::<NdArray>::assemble(&config, &device).unwrap();
        let reloaded = fresh
            .load_checkpoint(&dir.path().join("best_model.mpk"), &device)
            .unwrap();

        let (LesionClassifier::ResNet(saved), LesionClassifier::ResNet(loaded)) =
            (&model, &reloaded)
        else {
            panic!("expected resnet");
        };
        let bits = |v: Vec<f32>| v.into_iter().map(f32::to_bits).collect::<Vec<_>>();
        let host = |t: Tensor<NdArray, 2>| t.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        let host4 = |t: Tensor<NdArray, 4>| t.into_data().convert::<f32>().to_vec::<f32>().unwrap();

        assert_eq!(bits(host(saved.fc.weight.val())), bits(host(loaded.fc.weight.val())));
        assert_eq!(
            bits(host4(saved.layer4[1].conv1.weight.val())),
            bits(host4(loaded.layer4[1].conv1.weight.val()))
        );
    }

    #[test]
    fn test_resnet_frozen_layers_unchanged_after_step() {
        let device = Default::default();
        let model =
            LesionClassifier::<TrainBackend>::assemble(&tiny_config(BackboneKind::ResNet), &device)
                .unwrap();
        assert_eq!(model.frozen_groups(), vec!["layer1", "layer2", "layer3"]);

        let LesionClassifier::ResNet(before) = &model else {
            panic!("expected resnet");
        };
        let layer1_before = weights(before.layer1[0].conv1.weight.val());
        let layer2_before = weights(before.layer2[0].conv1.weight.val());
        let layer3_before = weights(before.layer3[1].conv1.weight.val());
        let layer4_before = weights(before.layer4[0].conv1.weight.val());
        let head_before = weights(before.fc.weight.val());

        let model = one_step(model);
        let LesionClassifier::ResNet(after) = &model else {
            panic!("expected resnet");
        };

        assert_eq!(layer1_before, weights(after.layer1[0].conv1.weight.val()));
        assert_eq!(layer2_before, weights(after.layer2[0].conv1.weight.val()));
        assert_eq!(layer3_before, weights(after.layer3[1].conv1.weight.val()));
        assert_ne!(layer4_before, weights(after.layer4[0].conv1.weight.val()));
        assert_ne!(head_before, weights(after.fc.weight.val()));
    }

    #[test]
    fn test_efficientnet_frozen_prefix_unchanged_after_step() {
        let device = Default::default();
        let model = LesionClassifier::<TrainBackend>::assemble(
            &tiny_config(BackboneKind::EfficientNet),
            &device,
        )
        .unwrap();

        let LesionClassifier::EfficientNet(before) = &model else {
            panic!("expected efficientnet");
        };
        let last_frozen = efficientnet::FROZEN_BLOCKS - 1;
        let first_trainable = efficientnet::FROZEN_BLOCKS;
        let block = |m: &EfficientNetB4<TrainBackend>, i: usize| {
            weights(m.blocks[i].depthwise.conv.weight.val())
        };

        let stem_before = weights(before.stem.conv.weight.val());
        let stem_gamma_before = weights(before.stem.bn.gamma.val());
        let first_before = block(before, 0);
        let last_frozen_before = block(before, last_frozen);
        let first_trainable_before = block(before, first_trainable);
        let final_block_before = block(before, before.blocks.len() - 1);
        let head_before = weights(before.fc.weight.val());

        let model = one_step(model);
        let LesionClassifier::EfficientNet(after) = &model else {
            panic!("expected efficientnet");
        };

        assert_eq!(stem_before, weights(after.stem.conv.weight.val()));
        assert_eq!(stem_gamma_before, weights(after.stem.bn.gamma.val()));
        assert_eq!(first_before, block(after, 0));
        assert_eq!(last_frozen_before, block(after, last_frozen));
        assert_ne!(first_trainable_before, block(after, first_trainable));
        assert_ne!(final_block_before, block(after, after.blocks.len() - 1));
        assert_ne!(head_before, weights(after.fc.weight.val()));
    }
}
