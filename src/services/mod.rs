pub mod classifier;
pub mod dispatcher;
pub mod pipeline;
pub mod preprocess;
pub mod storage;
