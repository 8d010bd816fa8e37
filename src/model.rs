//! Pretrained seq2seq commit message model.
//!
//! [`Seq2SeqGenerator`] loads a T5-family checkpoint on first use and keeps it
//! for the rest of the process. Weights come from a local directory or the
//! Hugging Face Hub.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::t5::{self, T5ForConditionalGeneration};
use hf_hub::{Repo, RepoType, api::sync::Api};
use parking_lot::Mutex;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info, warn};

use crate::{
   config::Configuration,
   decoding::{self, DecodeOptions, StepDecoder},
   error::{CommitGenError, Result},
};

/// Output cap in decoder tokens, decoder start token included.
pub const MAX_OUTPUT_TOKENS: usize = 50;

/// Text-in/text-out generation over a diff excerpt.
#[cfg_attr(test, mockall::automock)]
pub trait TextGenerator {
   fn generate(&self, excerpt: &str, config: &Configuration) -> Result<String>;
}

/// Generation settings read from the `model` table.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
   /// Tokenizer truncation length for the encoder input.
   pub max_input_length:  usize,
   pub max_output_length: usize,
   pub num_beams:         usize,
   pub temperature:       f64,
   pub top_k:             usize,
   pub top_p:             f64,
   pub do_sample:         bool,
   pub seed:              u64,
}

impl Default for GenerationParams {
   fn default() -> Self {
      Self {
         max_input_length:  512,
         max_output_length: MAX_OUTPUT_TOKENS,
         num_beams:         4,
         temperature:       0.7,
         top_k:             50,
         top_p:             0.95,
         do_sample:         false,
         seed:              42,
      }
   }
}

impl GenerationParams {
   pub fn from_config(config: &Configuration) -> Self {
      let d = Self::default();
      Self {
         max_input_length:  config.get("model.max_length", d.max_input_length),
         max_output_length: d.max_output_length,
         num_beams:         config.get("model.num_beams", d.num_beams),
         temperature:       config.get("model.temperature", d.temperature),
         top_k:             config.get("model.top_k", d.top_k),
         top_p:             config.get("model.top_p", d.top_p),
         do_sample:         config.get("model.do_sample", d.do_sample),
         seed:              config.get("model.seed", d.seed),
      }
   }

   pub fn decode_options(&self, decoder_start_token_id: u32, eos_token_id: u32) -> DecodeOptions {
      DecodeOptions {
         max_length: self.max_output_length,
         num_beams: self.num_beams,
         do_sample: self.do_sample,
         temperature: self.temperature,
         top_k: self.top_k,
         top_p: self.top_p,
         seed: self.seed,
         decoder_start_token_id,
         eos_token_id,
         ..DecodeOptions::default()
      }
   }
}

/// Which checkpoint to load and where to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
   /// Hub model id or local directory.
   pub name:      String,
   pub revision:  String,
   pub device:    String,
   /// Separate `tokenizer.json` source: a file, a directory holding one, or
   /// a Hub repo id. Needed for checkpoints that only ship `spiece.model`.
   pub tokenizer: Option<String>,
}

impl ModelSource {
   pub fn from_config(config: &Configuration) -> Result<Self> {
      let name: String = config.get("model.name", String::new());
      if name.trim().is_empty() {
         return Err(CommitGenError::ModelError("`model.name` is not configured".to_string()));
      }
      Ok(Self {
         name,
         revision: config.get("model.revision", "main".to_string()),
         device: config.get("model.device", "auto".to_string()),
         tokenizer: Some(config.get("model.tokenizer", String::new()))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
      })
   }
}

/// Pick the compute device for a `model.device` setting.
pub fn select_device(preference: &str) -> Result<Device> {
   match preference.to_ascii_lowercase().as_str() {
      "cpu" => Ok(Device::Cpu),
      "cuda" | "gpu" => Ok(Device::new_cuda(0)?),
      "auto" => Ok(Device::cuda_if_available(0)?),
      other => {
         warn!("Unknown model.device `{other}`, using auto");
         Ok(Device::cuda_if_available(0)?)
      },
   }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Weights {
   SafeTensors(PathBuf),
   Pytorch(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ModelFiles {
   config:    PathBuf,
   tokenizer: PathBuf,
   weights:   Weights,
}

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SAFETENSORS_FILE: &str = "model.safetensors";
const PYTORCH_FILE: &str = "pytorch_model.bin";

impl ModelFiles {
   fn locate(source: &ModelSource) -> Result<Self> {
      let tokenizer = source.tokenizer.as_deref().map(locate_tokenizer).transpose()?;
      let dir = Path::new(&source.name);
      if dir.is_dir() {
         Self::from_dir(dir, tokenizer)
      } else {
         Self::from_hub(source, tokenizer)
      }
   }

   /// `tokenizer` overrides the checkpoint's own `tokenizer.json`.
   fn from_dir(dir: &Path, tokenizer: Option<PathBuf>) -> Result<Self> {
      let require = |file: &str| {
         let path = dir.join(file);
         if path.is_file() {
            Ok(path)
         } else {
            Err(CommitGenError::ModelError(format!("{} not found", path.display())))
         }
      };

      let weights = if dir.join(SAFETENSORS_FILE).is_file() {
         Weights::SafeTensors(dir.join(SAFETENSORS_FILE))
      } else if dir.join(PYTORCH_FILE).is_file() {
         Weights::Pytorch(dir.join(PYTORCH_FILE))
      } else {
         return Err(CommitGenError::ModelError(format!(
            "no {SAFETENSORS_FILE} or {PYTORCH_FILE} in {}",
            dir.display()
         )));
      };

      let tokenizer = match tokenizer {
         Some(path) => path,
         None => {
            let path = dir.join(TOKENIZER_FILE);
            if !path.is_file() {
               return Err(missing_tokenizer(&format!("{} not found", path.display())));
            }
            path
         },
      };
      Ok(Self { config: require(CONFIG_FILE)?, tokenizer, weights })
   }

   fn from_hub(source: &ModelSource, tokenizer: Option<PathBuf>) -> Result<Self> {
      info!("Fetching {} ({}) from the Hugging Face Hub", source.name, source.revision);
      let api = Api::new()?;
      let repo =
         api.repo(Repo::with_revision(source.name.clone(), RepoType::Model, source.revision.clone()));

      let config = repo.get(CONFIG_FILE)?;
      let tokenizer = match tokenizer {
         Some(path) => path,
         None => repo
            .get(TOKENIZER_FILE)
            .map_err(|e| missing_tokenizer(&format!("{} has no {TOKENIZER_FILE}: {e}", source.name)))?,
      };
      let weights = match repo.get(SAFETENSORS_FILE) {
         Ok(path) => Weights::SafeTensors(path),
         Err(e) => {
            debug!("No {SAFETENSORS_FILE} ({e}), trying {PYTORCH_FILE}");
            Weights::Pytorch(repo.get(PYTORCH_FILE)?)
         },
      };
      Ok(Self { config, tokenizer, weights })
   }
}

fn missing_tokenizer(cause: &dyn std::fmt::Display) -> CommitGenError {
   CommitGenError::ModelError(format!(
      "{cause}; set `model.tokenizer` to a {TOKENIZER_FILE} file, a directory holding one, or a \
       Hub repo that ships one"
   ))
}

/// Resolve a `model.tokenizer` setting to a local `tokenizer.json`.
fn locate_tokenizer(setting: &str) -> Result<PathBuf> {
   let path = Path::new(setting);
   if path.is_file() {
      return Ok(path.to_path_buf());
   }
   if path.is_dir() {
      let file = path.join(TOKENIZER_FILE);
      if file.is_file() {
         return Ok(file);
      }
      return Err(CommitGenError::ModelError(format!("{} not found", file.display())));
   }
   info!("Fetching {TOKENIZER_FILE} from {setting}");
   Ok(Api::new()?.model(setting.to_string()).get(TOKENIZER_FILE)?)
}

/// A loaded checkpoint plus its tokenizer.
struct LoadedModel {
   model:                  T5ForConditionalGeneration,
   tokenizer:              Tokenizer,
   device:                 Device,
   decoder_start_token_id: u32,
   eos_token_id:           u32,
}

impl LoadedModel {
   fn load(source: &ModelSource) -> Result<Self> {
      let device = select_device(&source.device)?;
      let files = ModelFiles::locate(source)?;
      debug!("Model files: {files:?}");

      let mut model_config: t5::Config =
         serde_json::from_str(&std::fs::read_to_string(&files.config)?)?;
      // Beams are re-fed as full prefixes each step.
      model_config.use_cache = false;

      let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(CommitGenError::tokenizer)?;

      let vb = match &files.weights {
         Weights::SafeTensors(path) => {
            let tensors = candle_core::safetensors::load(path, &device)?;
            VarBuilder::from_tensors(tensors, DType::F32, &device)
         },
         Weights::Pytorch(path) => VarBuilder::from_pth(path, DType::F32, &device)?,
      };
      let model = T5ForConditionalGeneration::load(vb, &model_config)?;

      info!("Loaded {} on {:?}", source.name, device);
      Ok(Self {
         model,
         tokenizer,
         device,
         decoder_start_token_id: model_config
            .decoder_start_token_id
            .unwrap_or(model_config.pad_token_id) as u32,
         eos_token_id: model_config.eos_token_id as u32,
      })
   }

   fn generate(&mut self, excerpt: &str, params: &GenerationParams) -> Result<String> {
      self
         .tokenizer
         .with_truncation(Some(TruncationParams {
            max_length: params.max_input_length,
            ..Default::default()
         }))
         .map_err(CommitGenError::tokenizer)?;
      let encoding = self
         .tokenizer
         .encode(excerpt, true)
         .map_err(CommitGenError::tokenizer)?;
      let input = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;

      self.model.clear_kv_cache();
      let encoder_output = self.model.encode(&input)?;

      let opts = params.decode_options(self.decoder_start_token_id, self.eos_token_id);
      let mut step = T5Step { model: &mut self.model, encoder_output: &encoder_output, device: &self.device };
      let tokens = decoding::generate(&mut step, &opts)?;

      self
         .tokenizer
         .decode(&tokens, true)
         .map_err(CommitGenError::tokenizer)
   }
}

struct T5Step<'a> {
   model:          &'a mut T5ForConditionalGeneration,
   encoder_output: &'a Tensor,
   device:         &'a Device,
}

impl StepDecoder for T5Step<'_> {
   fn next_logits(&mut self, sequences: &[Vec<u32>]) -> Result<Tensor> {
      let batch = sequences.len();
      let seq_len = sequences.first().map_or(0, Vec::len);
      let flat: Vec<u32> = sequences.iter().flatten().copied().collect();
      let decoder_input = Tensor::from_vec(flat, (batch, seq_len), self.device)?;

      let (_, enc_len, hidden) = self.encoder_output.dims3()?;
      let encoder_output = self
         .encoder_output
         .broadcast_as((batch, enc_len, hidden))?
         .contiguous()?;
      Ok(self.model.decode(&decoder_input, &encoder_output)?)
   }
}

/// Seq2seq generator backed by a lazily loaded T5 checkpoint.
///
/// The checkpoint named by the first call's configuration is kept for the
/// lifetime of the generator.
#[derive(Default)]
pub struct Seq2SeqGenerator {
   loaded: Mutex<Option<LoadedModel>>,
}

impl std::fmt::Debug for Seq2SeqGenerator {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Seq2SeqGenerator")
         .field("loaded", &self.loaded.lock().is_some())
         .finish()
   }
}

impl Seq2SeqGenerator {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn is_loaded(&self) -> bool {
      self.loaded.lock().is_some()
   }
}

impl TextGenerator for Seq2SeqGenerator {
   fn generate(&self, excerpt: &str, config: &Configuration) -> Result<String> {
      let params = GenerationParams::from_config(config);
      let mut guard = self.loaded.lock();
      if guard.is_none() {
         *guard = Some(LoadedModel::load(&ModelSource::from_config(config)?)?);
      }
      let loaded = guard
         .as_mut()
         .ok_or_else(|| CommitGenError::ModelError("model failed to initialize".to_string()))?;
      loaded.generate(excerpt, &params)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_generation_params_defaults_from_builtin_config() {
      let params = GenerationParams::from_config(&Configuration::defaults());
      assert_eq!(params, GenerationParams::default());
      assert_eq!(params.max_output_length, MAX_OUTPUT_TOKENS);
   }

   #[test]
   fn test_generation_params_fall_back_when_unset() {
      let params = GenerationParams::from_config(&Configuration::default());
      assert_eq!(params.max_input_length, 512);
      assert_eq!(params.num_beams, 4);
      assert_eq!(params.top_k, 50);
      assert!((params.temperature - 0.7).abs() < 1e-9);
      assert!((params.top_p - 0.95).abs() < 1e-9);
   }

   #[test]
   fn test_generation_params_overrides() {
      let mut config = Configuration::defaults();
      config.set("model.num_beams", 1);
      config.set("model.do_sample", true);
      config.set("model.max_length", 128);
      let params = GenerationParams::from_config(&config);
      assert_eq!(params.num_beams, 1);
      assert!(params.do_sample);
      assert_eq!(params.max_input_length, 128);

      let opts = params.decode_options(0, 1);
      assert_eq!(opts.max_length, MAX_OUTPUT_TOKENS);
      assert_eq!(opts.num_beams, 1);
      assert!(opts.do_sample);
      assert_eq!(opts.eos_token_id, 1);
   }

   #[test]
   fn test_model_source_requires_name() {
      let mut config = Configuration::defaults();
      config.set("model.name", "  ");
      assert!(ModelSource::from_config(&config).is_err());

      config.set("model.name", "org/model");
      let source = ModelSource::from_config(&config).unwrap();
      assert_eq!(source.name, "org/model");
      assert_eq!(source.revision, "main");
      assert_eq!(source.device, "auto");
      assert_eq!(source.tokenizer, None);

      config.set("model.tokenizer", " t5-small ");
      let source = ModelSource::from_config(&config).unwrap();
      assert_eq!(source.tokenizer.as_deref(), Some("t5-small"));
   }

   #[test]
   fn test_select_device_cpu() {
      assert!(matches!(select_device("cpu").unwrap(), Device::Cpu));
      assert!(matches!(select_device("CPU").unwrap(), Device::Cpu));
   }

   #[test]
   fn test_model_files_from_dir() {
      let dir = tempfile::tempdir().unwrap();
      assert!(ModelFiles::from_dir(dir.path(), None).is_err());

      for file in [CONFIG_FILE, TOKENIZER_FILE, PYTORCH_FILE] {
         std::fs::write(dir.path().join(file), b"{}").unwrap();
      }
      let files = ModelFiles::from_dir(dir.path(), None).unwrap();
      assert_eq!(files.weights, Weights::Pytorch(dir.path().join(PYTORCH_FILE)));

      std::fs::write(dir.path().join(SAFETENSORS_FILE), b"").unwrap();
      let files = ModelFiles::from_dir(dir.path(), None).unwrap();
      assert_eq!(files.weights, Weights::SafeTensors(dir.path().join(SAFETENSORS_FILE)));
      assert_eq!(files.tokenizer, dir.path().join(TOKENIZER_FILE));
   }

   #[test]
   fn test_model_files_from_dir_requires_tokenizer() {
      let dir = tempfile::tempdir().unwrap();
      std::fs::write(dir.path().join(CONFIG_FILE), b"{}").unwrap();
      std::fs::write(dir.path().join(SAFETENSORS_FILE), b"").unwrap();
      let err = ModelFiles::from_dir(dir.path(), None).unwrap_err();
      assert!(err.to_string().contains(TOKENIZER_FILE));
      assert!(err.to_string().contains("model.tokenizer"));
   }

   #[test]
   fn test_tokenizer_setting_covers_checkpoint_without_tokenizer_json() {
      let model_dir = tempfile::tempdir().unwrap();
      std::fs::write(model_dir.path().join(CONFIG_FILE), b"{}").unwrap();
      std::fs::write(model_dir.path().join("spiece.model"), b"").unwrap();
      std::fs::write(model_dir.path().join(PYTORCH_FILE), b"").unwrap();
      let tok_dir = tempfile::tempdir().unwrap();
      std::fs::write(tok_dir.path().join(TOKENIZER_FILE), b"{}").unwrap();

      let mut config = Configuration::defaults();
      config.set("model.name", model_dir.path().display().to_string());
      config.set("model.tokenizer", tok_dir.path().display().to_string());
      let source = ModelSource::from_config(&config).unwrap();

      let files = ModelFiles::locate(&source).unwrap();
      assert_eq!(files.tokenizer, tok_dir.path().join(TOKENIZER_FILE));
      assert_eq!(files.config, model_dir.path().join(CONFIG_FILE));
   }

   #[test]
   fn test_locate_tokenizer_accepts_file_or_directory() {
      let dir = tempfile::tempdir().unwrap();
      assert!(locate_tokenizer(&dir.path().display().to_string()).is_err());

      let file = dir.path().join(TOKENIZER_FILE);
      std::fs::write(&file, b"{}").unwrap();
      assert_eq!(locate_tokenizer(&dir.path().display().to_string()).unwrap(), file);
      assert_eq!(locate_tokenizer(&file.display().to_string()).unwrap(), file);
   }

   #[test]
   fn test_generate_with_broken_local_model_fails_without_caching() {
      let dir = tempfile::tempdir().unwrap();
      let mut config = Configuration::defaults();
      config.set("model.name", dir.path().display().to_string());
      config.set("model.device", "cpu");

      let generator = Seq2SeqGenerator::new();
      assert!(generator.generate("+new line", &config).is_err());
      assert!(!generator.is_loaded());
   }
}
