pub mod aggregator;
pub mod annotate;
pub mod coordinator;
pub mod detector;
pub mod geotag;
pub mod media;
pub mod records;
pub mod storage;
pub mod video_job;
pub mod yolo;
