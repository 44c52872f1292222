pub mod capacity;
pub mod cleanup;
pub mod figures;
pub mod fusion;
pub mod imaging;
pub mod jobs;
pub mod orchestrator;
pub mod quota;
pub mod retry;
pub mod storage;
