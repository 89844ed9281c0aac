pub mod handle;
pub mod output;
pub mod supervisor;
pub mod worker;
