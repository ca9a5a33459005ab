pub mod correct;
pub mod evaluate;
pub mod status;
pub mod train;
