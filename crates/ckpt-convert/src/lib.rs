//! Checkpoint conversion through an f32 NumPy archive.
//!
//! Loads a parameter checkpoint (PyTorch, SafeTensors or `.npz`), casts every
//! tensor to contiguous f32, adds `lm_head.weight` as a copy of `wte.weight`
//! when the embedding is present, writes the mapping to an intermediate
//! `.npz` archive and hands it to an external tool (`convert-tensor` by
//! default) that produces the final artifact. The archive is deleted once the
//! tool returns.
//!
//! ```rust,no_run
//! use ckpt_convert::{Converter, ConverterConfig};
//!
//! let config = ConverterConfig::for_model_dir(std::path::Path::new("../fairy-safe"));
//! let report = Converter::new(config)?.convert()?;
//! println!("converted {} tensors", report.tensors);
//! # Ok::<(), ckpt_convert::ConvertError>(())
//! ```

pub mod archive;
pub mod config;
pub mod converter;
pub mod error;
pub mod normalize;
pub mod params;
pub mod reader;
pub mod tool;

pub use archive::{IntermediateArchive, read_archive, write_archive};
pub use config::{
    ConfigBuilder, ConfigError, ConverterConfig, LogFormat, LoggingConfig, ToolConfig,
};
pub use converter::{ConversionReport, Converter, convert, inspect};
pub use error::{ConvertError, Result};
pub use normalize::{EMBEDDING_WEIGHT, LM_HEAD_WEIGHT, normalize_precision, tie_embeddings};
pub use params::{ParameterMap, TensorSummary};
pub use reader::{CheckpointFormat, CheckpointReader, load_checkpoint};
pub use tool::ExternalTool;
