pub mod correlation;
pub mod json_extractor;
