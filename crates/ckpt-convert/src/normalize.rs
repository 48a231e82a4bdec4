//! Precision normalization and the tied output projection.

use candle_core::{DType, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::params::ParameterMap;

/// Precision every archived tensor is stored in.
pub const ARCHIVE_DTYPE: DType = DType::F32;

/// Input token embedding of GPT-2 style checkpoints.
pub const EMBEDDING_WEIGHT: &str = "wte.weight";

/// Output projection derived from [`EMBEDDING_WEIGHT`].
pub const LM_HEAD_WEIGHT: &str = "lm_head.weight";

/// Contiguous f32 copy of `tensor`.
pub fn to_f32(name: &str, tensor: &Tensor) -> Result<Tensor> {
    tensor
        .to_dtype(ARCHIVE_DTYPE)
        .and_then(|t| t.contiguous())
        .map_err(|e| ConvertError::tensor(name, e))
}

fn progress_bar(len: usize, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Cast every entry to contiguous f32, keeping names and order.
pub fn normalize_precision(params: ParameterMap, progress: bool) -> Result<ParameterMap> {
    let pb = progress_bar(params.len(), progress);
    let mut normalized = ParameterMap::new();

    for (name, tensor) in params.into_entries() {
        pb.set_message(name.clone());
        if tensor.dtype() != ARCHIVE_DTYPE {
            debug!("{}: {} -> {}", name, tensor.dtype().as_str(), ARCHIVE_DTYPE.as_str());
        }
        let cast = to_f32(&name, &tensor)?;
        normalized.insert(name, cast);
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(normalized)
}

/// Add `lm_head.weight` as an independent f32 copy of `wte.weight`.
///
/// Returns whether the alias was added. Without an embedding entry the map
/// is left untouched. An existing `lm_head.weight` is overwritten in place.
pub fn tie_embeddings(params: &mut ParameterMap) -> Result<bool> {
    let Some(embedding) = params.get(EMBEDDING_WEIGHT) else {
        debug!("No {} entry, skipping {}", EMBEDDING_WEIGHT, LM_HEAD_WEIGHT);
        return Ok(false);
    };

    let alias = to_f32(EMBEDDING_WEIGHT, embedding)?
        .copy()
        .map_err(|e| ConvertError::tensor(LM_HEAD_WEIGHT, e))?;

    if params.insert_after(EMBEDDING_WEIGHT, LM_HEAD_WEIGHT, alias).is_some() {
        warn!("Replaced existing {} with a copy of {}", LM_HEAD_WEIGHT, EMBEDDING_WEIGHT);
    } else {
        debug!("Added {} from {}", LM_HEAD_WEIGHT, EMBEDDING_WEIGHT);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use half::{bf16, f16};

    fn vector(values: &[f32]) -> Tensor {
        Tensor::new(values, &Device::Cpu).unwrap()
    }

    fn bits(t: &Tensor) -> Vec<u32> {
        t.flatten_all().unwrap().to_vec1::<f32>().unwrap().iter().map(|v| v.to_bits()).collect()
    }

    #[test]
    fn casts_half_precisions_exactly() {
        let halves = [f16::from_f32(1.5), f16::from_f32(-0.25), f16::from_f32(65504.0)];
        let brains = [bf16::from_f32(3.0), bf16::from_f32(-1.0e-3)];
        let params = ParameterMap::from_entries([
            ("a".to_string(), Tensor::new(&halves, &Device::Cpu).unwrap()),
            ("b".to_string(), Tensor::new(&brains, &Device::Cpu).unwrap()),
        ]);

        let out = normalize_precision(params, false).unwrap();
        assert!(out.is_uniform(DType::F32));
        let expected_a: Vec<u32> = halves.iter().map(|h| h.to_f32().to_bits()).collect();
        let expected_b: Vec<u32> = brains.iter().map(|h| h.to_f32().to_bits()).collect();
        assert_eq!(bits(out.get("a").unwrap()), expected_a);
        assert_eq!(bits(out.get("b").unwrap()), expected_b);
    }

    #[test]
    fn casts_integer_and_double_tensors() {
        let params = ParameterMap::from_entries([
            ("ids".to_string(), Tensor::new(&[0i64, 1, 2], &Device::Cpu).unwrap()),
            ("scale".to_string(), Tensor::new(&[0.5f64], &Device::Cpu).unwrap()),
        ]);
        let out = normalize_precision(params, false).unwrap();
        assert_eq!(out.get("ids").unwrap().to_vec1::<f32>().unwrap(), vec![0.0, 1.0, 2.0]);
        assert_eq!(out.get("scale").unwrap().to_vec1::<f32>().unwrap(), vec![0.5]);
    }

    #[test]
    fn makes_transposed_tensors_contiguous() {
        let t = Tensor::new(&[[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]], &Device::Cpu).unwrap();
        let transposed = t.t().unwrap();
        assert!(!transposed.is_contiguous());

        let params = ParameterMap::from_entries([("w".to_string(), transposed)]);
        let out = normalize_precision(params, false).unwrap();
        let w = out.get("w").unwrap();
        assert!(w.is_contiguous());
        assert_eq!(w.dims(), &[3, 2]);
        assert_eq!(
            w.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 4.0], vec![2.0, 5.0], vec![3.0, 6.0]]
        );
    }

    #[test]
    fn keeps_order_through_normalization() {
        let params = ParameterMap::from_entries([
            ("z".to_string(), vector(&[1.0])),
            ("a".to_string(), vector(&[2.0])),
            ("m".to_string(), vector(&[3.0])),
        ]);
        let out = normalize_precision(params, false).unwrap();
        assert_eq!(out.names().collect::<Vec<_>>(), ["z", "a", "m"]);
    }

    #[test]
    fn ties_embedding_after_source_entry() {
        let mut params = ParameterMap::from_entries([
            ("wte.weight".to_string(), vector(&[1.0, 2.0])),
            ("ln.bias".to_string(), vector(&[0.5])),
        ]);
        assert!(tie_embeddings(&mut params).unwrap());
        assert_eq!(params.names().collect::<Vec<_>>(), ["wte.weight", "lm_head.weight", "ln.bias"]);
        assert_eq!(params.get("lm_head.weight").unwrap().to_vec1::<f32>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn tying_without_embedding_is_noop() {
        let mut params = ParameterMap::from_entries([("ln.bias".to_string(), vector(&[0.5]))]);
        assert!(!tie_embeddings(&mut params).unwrap());
        assert_eq!(params.names().collect::<Vec<_>>(), ["ln.bias"]);
    }

    #[test]
    fn tying_casts_half_embedding_to_f32() {
        let emb = Tensor::new(&[f16::from_f32(0.1), f16::from_f32(2.0)], &Device::Cpu).unwrap();
        let mut params = ParameterMap::from_entries([("wte.weight".to_string(), emb)]);
        tie_embeddings(&mut params).unwrap();

        let head = params.get("lm_head.weight").unwrap();
        assert_eq!(head.dtype(), DType::F32);
        let expected = [f16::from_f32(0.1).to_f32().to_bits(), 2.0f32.to_bits()];
        assert_eq!(bits(head), expected);
    }

    #[test]
    fn tying_overwrites_existing_head() {
        let mut params = ParameterMap::from_entries([
            ("lm_head.weight".to_string(), vector(&[9.0, 9.0])),
            ("wte.weight".to_string(), vector(&[1.0, 2.0])),
        ]);
        assert!(tie_embeddings(&mut params).unwrap());
        assert_eq!(params.len(), 2);
        assert_eq!(params.names().next(), Some("lm_head.weight"));
        assert_eq!(params.get("lm_head.weight").unwrap().to_vec1::<f32>().unwrap(), vec![1.0, 2.0]);
    }
}
