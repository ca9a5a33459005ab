pub mod artifacts;
pub mod classifier;
pub mod corrector;
pub mod features;
pub mod gbdt;
pub mod naming;
pub mod outline;
pub mod similarity;
