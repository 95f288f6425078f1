pub mod extracted_indicator;
pub mod processed_file;
pub mod processing_job;
