pub mod preprocess;
pub mod processes;
pub mod runs;
pub mod solver;
