mod pipeline;
mod repository;
mod storage_props;
