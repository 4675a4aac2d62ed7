pub mod features;
pub mod ingest;
pub mod labels;
pub mod simulate;
