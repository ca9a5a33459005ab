mod corpus;
mod datasets;
mod rules;
mod run;

pub use run::run;

pub(crate) use corpus::{load_training_records, open_corpus_connection};
pub(crate) use rules::{corrected_group_has_catch_all, extract_rules};
#[cfg(test)]
pub(crate) use run::train_artifacts;

use datasets::{build_others_dataset, build_removal_dataset};
