pub mod cart_reader;
pub mod catalog_reader;
pub mod outcome_writer;
