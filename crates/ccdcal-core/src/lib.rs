pub mod classify;
pub mod consts;
pub mod correct;
pub mod error;
pub mod frame;
pub mod io;
pub mod lineage;
pub mod master;
pub mod pipeline;
pub mod postprocess;
pub mod stack;
