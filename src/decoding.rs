//! Token decoding strategies for encoder/decoder models.
//!
//! The model is abstracted behind [`StepDecoder`], which maps a batch of
//! decoder prefixes to next-token logits. Beam search, greedy and sampled
//! decoding are all driven from here.

use candle_core::{D, DType, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use tracing::{debug, warn};

use crate::error::{CommitGenError, Result};

/// One decoder step over a batch of equal-length prefixes.
pub trait StepDecoder {
   /// Logits for the next token of every sequence, shaped `(sequences, vocab)`.
   fn next_logits(&mut self, sequences: &[Vec<u32>]) -> Result<Tensor>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
   /// Cap on the decoder sequence, start token included.
   pub max_length:             usize,
   pub num_beams:              usize,
   pub do_sample:              bool,
   pub temperature:            f64,
   /// `0` disables top-k filtering.
   pub top_k:                  usize,
   pub top_p:                  f64,
   pub seed:                   u64,
   pub length_penalty:         f32,
   pub decoder_start_token_id: u32,
   pub eos_token_id:           u32,
}

impl Default for DecodeOptions {
   fn default() -> Self {
      Self {
         max_length:             50,
         num_beams:              4,
         do_sample:              false,
         temperature:            0.7,
         top_k:                  50,
         top_p:                  0.95,
         seed:                   42,
         length_penalty:         1.0,
         decoder_start_token_id: 0,
         eos_token_id:           1,
      }
   }
}

#[derive(Debug, Clone)]
pub enum DecodingStrategy {
   Greedy,
   BeamSearch { num_beams: usize },
   Sample { sampling: Sampling, seed: u64 },
}

impl DecodingStrategy {
   pub fn from_options(opts: &DecodeOptions) -> Self {
      if opts.do_sample {
         if opts.num_beams > 1 {
            warn!("Sampling enabled; ignoring num_beams = {}", opts.num_beams);
         }
         return Self::Sample { sampling: sampling_for(opts), seed: opts.seed };
      }
      if opts.num_beams > 1 {
         Self::BeamSearch { num_beams: opts.num_beams }
      } else {
         Self::Greedy
      }
   }
}

fn sampling_for(opts: &DecodeOptions) -> Sampling {
   let temperature = opts.temperature;
   if temperature <= 0.0 {
      return Sampling::ArgMax;
   }
   let use_top_p = opts.top_p > 0.0 && opts.top_p < 1.0;
   match (opts.top_k, use_top_p) {
      (0, false) => Sampling::All { temperature },
      (0, true) => Sampling::TopP { p: opts.top_p, temperature },
      (k, false) => Sampling::TopK { k, temperature },
      (k, true) => Sampling::TopKThenTopP { k, p: opts.top_p, temperature },
   }
}

/// Decode a single output sequence.
///
/// Returns the generated token ids without the decoder start token and
/// without a trailing EOS.
pub fn generate<S: StepDecoder>(decoder: &mut S, opts: &DecodeOptions) -> Result<Vec<u32>> {
   let strategy = DecodingStrategy::from_options(opts);
   debug!("Decoding with {strategy:?}");
   let tokens = match strategy {
      DecodingStrategy::Greedy => step_loop(decoder, opts, Sampling::ArgMax, opts.seed)?,
      DecodingStrategy::Sample { sampling, seed } => step_loop(decoder, opts, sampling, seed)?,
      DecodingStrategy::BeamSearch { num_beams } => beam_search(decoder, opts, num_beams)?,
   };
   Ok(strip_markers(tokens, opts))
}

fn strip_markers(mut tokens: Vec<u32>, opts: &DecodeOptions) -> Vec<u32> {
   if tokens.last() == Some(&opts.eos_token_id) {
      tokens.pop();
   }
   if tokens.first() == Some(&opts.decoder_start_token_id) {
      tokens.remove(0);
   }
   tokens
}

/// Single-sequence decoding, one sampled token per step.
fn step_loop<S: StepDecoder>(
   decoder: &mut S,
   opts: &DecodeOptions,
   sampling: Sampling,
   seed: u64,
) -> Result<Vec<u32>> {
   let mut processor = LogitsProcessor::from_sampling(seed, sampling);
   let mut tokens = vec![opts.decoder_start_token_id];

   while tokens.len() < opts.max_length {
      let logits = decoder.next_logits(std::slice::from_ref(&tokens))?;
      let next = processor.sample(&logits.squeeze(0)?.to_dtype(DType::F32)?)?;
      tokens.push(next);
      if next == opts.eos_token_id {
         break;
      }
   }
   Ok(tokens)
}

#[derive(Debug, Clone)]
struct Hypothesis {
   tokens: Vec<u32>,
   score:  f32,
}

impl Hypothesis {
   fn normalized_score(&self, length_penalty: f32) -> f32 {
      self.score / length_factor(self.tokens.len(), length_penalty)
   }
}

/// `generated_len ^ length_penalty`, where the start token does not count.
fn length_factor(sequence_len: usize, length_penalty: f32) -> f32 {
   let generated = sequence_len.saturating_sub(1).max(1);
   (generated as f32).powf(length_penalty)
}

struct FinishedHypotheses {
   hypotheses:     Vec<Hypothesis>,
   num_beams:      usize,
   length_penalty: f32,
   worst_score:    f32,
}

impl FinishedHypotheses {
   const fn new(num_beams: usize, length_penalty: f32) -> Self {
      Self { hypotheses: Vec::new(), num_beams, length_penalty, worst_score: f32::INFINITY }
   }

   fn add(&mut self, hypothesis: Hypothesis) {
      let score = hypothesis.normalized_score(self.length_penalty);
      if self.hypotheses.len() >= self.num_beams && score <= self.worst_score {
         return;
      }

      self.hypotheses.push(hypothesis);
      let lp = self.length_penalty;
      self
         .hypotheses
         .sort_by(|a, b| b.normalized_score(lp).total_cmp(&a.normalized_score(lp)));
      self.hypotheses.truncate(self.num_beams);
      self.worst_score = self
         .hypotheses
         .last()
         .map_or(f32::INFINITY, |h| h.normalized_score(lp));
   }

   /// No running beam of length `sequence_len` can beat the worst kept one.
   fn is_done(&self, best_running_score: f32, sequence_len: usize) -> bool {
      if self.hypotheses.len() < self.num_beams {
         return false;
      }
      let attainable = best_running_score / length_factor(sequence_len, self.length_penalty);
      self.worst_score >= attainable
   }

   fn into_best(self) -> Option<Hypothesis> {
      self.hypotheses.into_iter().next()
   }
}

/// Indices and values of the `k` largest entries, best first.
fn top_k(row: &[f32], k: usize) -> Vec<(u32, f32)> {
   let mut indexed: Vec<(u32, f32)> = row
      .iter()
      .enumerate()
      .map(|(i, &v)| (i as u32, v))
      .collect();
   indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
   indexed.truncate(k);
   indexed
}

fn beam_search<S: StepDecoder>(
   decoder: &mut S,
   opts: &DecodeOptions,
   num_beams: usize,
) -> Result<Vec<u32>> {
   let eos = opts.eos_token_id;
   let mut finished = FinishedHypotheses::new(num_beams, opts.length_penalty);
   let mut beams = vec![Hypothesis { tokens: vec![opts.decoder_start_token_id], score: 0.0 }];
   let mut done = false;

   while beams[0].tokens.len() < opts.max_length {
      let sequences: Vec<Vec<u32>> = beams.iter().map(|b| b.tokens.clone()).collect();
      let logits = decoder.next_logits(&sequences)?.to_dtype(DType::F32)?;
      let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?.to_vec2::<f32>()?;

      let mut candidates: Vec<(f32, usize, u32)> = Vec::with_capacity(beams.len() * 2 * num_beams);
      for (beam_idx, (beam, row)) in beams.iter().zip(&log_probs).enumerate() {
         for (token, log_prob) in top_k(row, 2 * num_beams) {
            candidates.push((beam.score + log_prob, beam_idx, token));
         }
      }
      candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

      let mut next_beams = Vec::with_capacity(num_beams);
      for (rank, (score, beam_idx, token)) in candidates.into_iter().enumerate() {
         let mut tokens = beams[beam_idx].tokens.clone();
         tokens.push(token);
         if token == eos {
            // only EOS picks that would have made the beam cut count
            if rank < num_beams {
               finished.add(Hypothesis { tokens, score });
            }
         } else {
            next_beams.push(Hypothesis { tokens, score });
         }
         if next_beams.len() == num_beams {
            break;
         }
      }

      if next_beams.is_empty() {
         done = true;
         break;
      }
      beams = next_beams;
      if finished.is_done(beams[0].score, beams[0].tokens.len()) {
         done = true;
         break;
      }
   }

   if !done {
      for beam in beams {
         finished.add(beam);
      }
   }

   finished
      .into_best()
      .map(|h| h.tokens)
      .ok_or_else(|| CommitGenError::ModelError("beam search produced no hypothesis".to_string()))
}
