pub mod bayes;
pub mod correlation;
pub mod linalg;
pub mod qf;
