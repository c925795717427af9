pub mod config;
pub mod inference_config;
pub mod label_manifest;
pub mod model_metadata;
pub mod model_storage;

pub use config::{DeviceType, PipelineConfig};
pub use inference_config::InferenceConfig;
pub use label_manifest::LabelManifest;
pub use model_metadata::ModelMetadata;
pub use model_storage::{load_metadata, load_model_with_metadata, log_metadata_info, save_model_with_metadata};
